use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicIsize, AtomicU32, AtomicU64, Ordering};

use crate::raw::{cell, Pool, Tagged};
use crate::Stack;

// The size of the pool's first chunk.
const FIRST_CHUNK: usize = 32;

/// A lock-free stack whose head packs a slot handle and a per-node push
/// stamp into one atomically comparable word.
///
/// This is the classic tagged-pointer ABA defense used when memory is
/// recycled outside any garbage collector, rendered over stable pool
/// handles instead of raw addresses. Each node carries a stamp that is
/// bumped on every insertion into a list (live or free), so a given
/// (handle, stamp) pair can never denote two distinct logical pushes:
/// a thread holding a stale head word will always fail its CAS, because
/// any reuse of that slot was published under a different stamp.
///
/// Unlike [`RecyclingStack`](crate::RecyclingStack), where the
/// generation lives in the head word of each list, the stamp here
/// belongs to the node: a node's `next` field holds the full packed word
/// it was pushed on top of, and popping installs that word as the new
/// head wholesale.
pub struct PackedStack<T> {
    pool: Pool<Node<T>>,
    head: AtomicU64,
    free: AtomicU64,
    len: AtomicIsize,
}

struct Node<T> {
    /// The raw head word this node was pushed on top of.
    next: AtomicU64,

    /// The per-node push stamp; bumped on every list insertion.
    stamp: AtomicU32,

    value: UnsafeCell<Option<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Node<T> {
        Node {
            next: AtomicU64::new(Tagged::empty(0).raw),
            stamp: AtomicU32::new(0),
            value: UnsafeCell::new(None),
        }
    }
}

impl<T> PackedStack<T> {
    /// Creates an empty stack.
    pub fn new() -> PackedStack<T> {
        PackedStack {
            pool: Pool::new(FIRST_CHUNK),
            head: AtomicU64::new(Tagged::empty(0).raw),
            free: AtomicU64::new(Tagged::empty(0).raw),
            len: AtomicIsize::new(0),
        }
    }

    /// Pops a free node, or claims and validates a fresh slot.
    fn acquire(&self) -> u32 {
        if let Some(index) = self.pop_from(&self.free) {
            return index;
        }

        let index = self.pool.acquire();

        // Checked once per slot lifetime: if the handle does not survive
        // the round trip with a maximal stamp, the packed representation
        // cannot distinguish generations for this slot, and continuing
        // would corrupt the stack rather than fail loudly.
        let check = Tagged::new(index, u32::MAX);
        assert!(
            check.index() == Some(index) && check.tag() == u32::MAX,
            "slot handle does not survive head-word packing"
        );

        index
    }

    fn push_onto(&self, head: &AtomicU64, index: u32) {
        let node = self.pool.get(index);

        // Bump the stamp before linking. From here on, (index, stamp) is
        // unique across every insertion of this slot, which is what makes
        // the plain pre-CAS read of the old head below safe: no concurrent
        // unpack of this exact pair can be confused with an earlier or
        // later push of the same slot.
        let stamp = node.stamp.load(Ordering::Relaxed).wrapping_add(1);
        node.stamp.store(stamp, Ordering::Relaxed);
        let new = Tagged::new(index, stamp);

        loop {
            let old = head.load(Ordering::Acquire);
            node.next.store(old, Ordering::Relaxed);

            if head
                .compare_exchange_weak(old, new.raw, Ordering::Release, Ordering::Relaxed)
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

            // Possibly stale if the node is concurrently reused; the CAS
            // below fails in that case because the reuse changed the
            // stamp half of the head word.
            let next = self.pool.get(index).next.load(Ordering::Relaxed);

            if head
                .compare_exchange_weak(old.raw, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(index);
            }
        }
    }
}

impl<T> PackedStack<T>
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

            // Safety: a concurrent pop or reusing push may be writing
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

impl<T: Send> Stack<T> for PackedStack<T> {
    fn push(&self, value: T) {
        let index = self.acquire();
        let node = self.pool.get(index);

        // Safety: the slot is exclusively ours until it is linked in,
        // but a peek that read its handle from a stale head word may
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

impl<T> Default for PackedStack<T> {
    fn default() -> PackedStack<T> {
        PackedStack::new()
    }
}

unsafe impl<T: Send> Send for PackedStack<T> {}
unsafe impl<T: Send> Sync for PackedStack<T> {}
