use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicIsize, AtomicU32, AtomicU64, Ordering};

use crate::raw::{cell, Pool, Tagged};
use crate::Stack;

// The size of the pool's first chunk.
const FIRST_CHUNK: usize = 32;

/// A lock-free stack that recycles popped nodes through an internal
/// free list.
///
/// The live list and the free list are two independent index-linked lists
/// over one slot pool, sharing a single head-tagging scheme: every
/// successful push or pop installs a bumped generation tag alongside the
/// new head reference. A thread that read a stale head can therefore
/// never CAS successfully, even if the slot it observed has since been
/// popped, recycled, and pushed again.
///
/// Pushing pops the free list before falling back to claiming a fresh
/// slot, so a steady-state workload stops allocating entirely.
pub struct RecyclingStack<T> {
    pool: Pool<Node<T>>,
    head: AtomicU64,
    free: AtomicU64,
    len: AtomicIsize,
}

struct Node<T> {
    /// Slot reference of the next node, in the head-word encoding.
    next: AtomicU32,
    value: UnsafeCell<Option<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Node<T> {
        Node {
            next: AtomicU32::new(Tagged::empty(0).slot_ref()),
            value: UnsafeCell::new(None),
        }
    }
}

impl<T> RecyclingStack<T> {
    /// Creates an empty stack.
    ///
    /// Both heads are fully initialized here, before the stack can be
    /// shared; there is no lazy first-use setup to race on.
    pub fn new() -> RecyclingStack<T> {
        RecyclingStack {
            pool: Pool::new(FIRST_CHUNK),
            head: AtomicU64::new(Tagged::empty(0).raw),
            free: AtomicU64::new(Tagged::empty(0).raw),
            len: AtomicIsize::new(0),
        }
    }

    /// Pops a recycled node, or claims a fresh slot from the pool.
    fn acquire(&self) -> u32 {
        self.pop_from(&self.free)
            .unwrap_or_else(|| self.pool.acquire())
    }

    fn push_onto(&self, head: &AtomicU64, index: u32) {
        let node = self.pool.get(index);
        loop {
            let old = Tagged::from_raw(head.load(Ordering::Acquire));
            node.next.store(old.slot_ref(), Ordering::Relaxed);

            let new = Tagged::new(index, old.tag().wrapping_add(1));
            if head
                .compare_exchange_weak(old.raw, new.raw, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn pop_from(&self, head: &AtomicU64) -> Option<u32> {
        loop {
            let old = Tagged::from_raw(head.load(Ordering::Acquire));
            let index = old.index()?;

            // The node may be concurrently popped and reused, making this
            // `next` stale; the tag check below catches exactly that.
            let next = self.pool.get(index).next.load(Ordering::Relaxed);

            let new = Tagged::from_ref(next, old.tag().wrapping_add(1));
            if head
                .compare_exchange_weak(old.raw, new.raw, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(index);
            }
        }
    }
}

impl<T> RecyclingStack<T>
where
    T: Copy,
{
    /// Returns a copy of the current top without removing it.
    ///
    /// Advisory only: the value may already have been popped by the time
    /// the caller inspects it.
    pub fn peek(&self) -> Option<T> {
        loop {
            let old = Tagged::from_raw(self.head.load(Ordering::Acquire));
            let index = old.index()?;
            let node = self.pool.get(index);

            // Safety: a concurrent pop or recycling push may be writing
            // this slot, so the bytes are copied atomically and only
            // trusted if the head word is unchanged afterwards, meaning
            // no such write could have overlapped the copy. The fence
            // keeps the copy from drifting past the revalidating load.
            let value = unsafe { cell::load(node.value.get()) };

            fence(Ordering::Acquire);
            if self.head.load(Ordering::Relaxed) == old.raw {
                return unsafe { value.assume_init() };
            }
        }
    }
}

impl<T: Send> Stack<T> for RecyclingStack<T> {
    fn push(&self, value: T) {
        let index = self.acquire();
        let node = self.pool.get(index);

        // Safety: the slot is exclusively ours until it is linked in,
        // but a peek that read its index from a stale head word may
        // still be copying it, so the write goes through `cell`.
        unsafe { cell::store(node.value.get(), Some(value)) }

        self.push_onto(&self.head, index);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    fn pop(&self) -> Option<T> {
        let index = self.pop_from(&self.head)?;
        let node = self.pool.get(index);

        // Safety: the winning CAS detached the node, so the slot is
        // exclusively ours until it is threaded onto the free list. The
        // `None` left behind keeps the pool's drop from double-dropping
        // the moved-out value; it is stored through `cell` because a
        // stale peek may still be copying the slot.
        let value = unsafe { ptr::read(node.value.get()) };
        unsafe { cell::store(node.value.get(), None) }
        debug_assert!(value.is_some());

        self.push_onto(&self.free, index);
        self.len.fetch_sub(1, Ordering::Relaxed);
        value
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<T> Default for RecyclingStack<T> {
    fn default() -> RecyclingStack<T> {
        RecyclingStack::new()
    }
}

unsafe impl<T: Send> Send for RecyclingStack<T> {}
unsafe impl<T: Send> Sync for RecyclingStack<T> {}
