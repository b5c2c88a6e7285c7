use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};

use crate::raw::{cell, Pool};
use crate::Stack;

// The size of the pool's first chunk.
const FIRST_CHUNK: usize = 32;

/// A lock-free stack whose nodes are batch-allocated from a growable
/// buffer.
///
/// Slot acquisition increments the pool's packed (count, capacity) cursor
/// and is lock-free in the common case; only growing the buffer takes a
/// lock. A popped slot is retired permanently rather than recycled, so a
/// slot address is handed out exactly once and the plain head CAS is
/// ABA-safe without tagging. The trade-off is one-way buffer growth: the
/// buffer's high-water mark is the total number of pushes, not the peak
/// stack depth.
pub struct BufferedStack<T> {
    pool: Pool<Node<T>>,
    head: AtomicPtr<Node<T>>,
    len: AtomicIsize,
}

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: UnsafeCell<Option<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Node<T> {
        Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(None),
        }
    }
}

impl<T> BufferedStack<T> {
    /// Creates an empty stack.
    pub fn new() -> BufferedStack<T> {
        BufferedStack::with_capacity(FIRST_CHUNK)
    }

    /// Creates an empty stack whose first buffer chunk holds at least
    /// `capacity` slots.
    pub fn with_capacity(capacity: usize) -> BufferedStack<T> {
        BufferedStack {
            pool: Pool::new(capacity),
            head: AtomicPtr::new(ptr::null_mut()),
            len: AtomicIsize::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn slots_used(&self) -> usize {
        self.pool.allocated()
    }
}

impl<T> BufferedStack<T>
where
    T: Copy,
{
    /// Returns a copy of the current top without removing it.
    ///
    /// Advisory only: the value may already have been popped by the time
    /// the caller inspects it.
    pub fn peek(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            // Safety: slots are never freed before the stack drops, but a
            // concurrent pop may be taking the value, so the bytes are
            // copied atomically and only trusted if the head is unchanged
            // afterwards, meaning no pop of this node could have
            // overlapped the copy. The fence keeps the copy from drifting
            // past the revalidating load.
            let value = unsafe { cell::load((*head).value.get()) };

            fence(Ordering::Acquire);
            if self.head.load(Ordering::Relaxed) == head {
                return unsafe { value.assume_init() };
            }
        }
    }
}

impl<T: Send> Stack<T> for BufferedStack<T> {
    fn push(&self, value: T) {
        let node = self.pool.get(self.pool.acquire());

        // Safety: the slot was issued to us alone and has never been
        // published.
        unsafe { *node.value.get() = Some(value) }

        let raw = node as *const Node<T> as *mut Node<T>;
        loop {
            let head = self.head.load(Ordering::Relaxed);
            node.next.store(head, Ordering::Relaxed);

            if self
                .head
                .compare_exchange_weak(head, raw, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            // Safety: slots live as long as the pool, and a retired slot
            // is never reissued, so `head` cannot be a stale reuse.
            let next = unsafe { (*head).next.load(Ordering::Relaxed) };

            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);

                // Safety: the winning CAS retired the slot; only a stale
                // peek can still be copying it, so the `None` that keeps
                // the pool's drop from double-dropping the moved-out
                // value is stored through `cell`.
                let value = unsafe { ptr::read((*head).value.get()) };
                unsafe { cell::store((*head).value.get(), None) }
                debug_assert!(value.is_some());
                return value;
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<T> Default for BufferedStack<T> {
    fn default() -> BufferedStack<T> {
        BufferedStack::new()
    }
}

unsafe impl<T: Send> Send for BufferedStack<T> {}
unsafe impl<T: Send> Sync for BufferedStack<T> {}
