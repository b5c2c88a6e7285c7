use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use seize::{reclaim, Collector, Guard};

use crate::Stack;

/// A lock-free stack that allocates a fresh node for every push.
///
/// Popped nodes are retired through a [`seize::Collector`] rather than
/// freed eagerly, so an address can never be reinserted while another
/// thread still holds a stale reference to it. That makes the plain head
/// CAS ABA-safe without any tagging, at the cost of an allocation per
/// push.
pub struct BasicStack<T> {
    head: AtomicPtr<Node<T>>,
    collector: Collector,
    len: AtomicIsize,
}

struct Node<T> {
    value: ManuallyDrop<T>,
    next: *mut Node<T>,
}

impl<T> BasicStack<T> {
    /// Creates an empty stack.
    pub fn new() -> BasicStack<T> {
        BasicStack {
            head: AtomicPtr::new(ptr::null_mut()),
            collector: Collector::new(),
            len: AtomicIsize::new(0),
        }
    }

    /// Bulk-loads the stack, replacing any prior contents.
    ///
    /// The last item ends up on top. Not safe to call concurrently with
    /// other operations, which `&mut self` enforces.
    pub fn init(&mut self, items: impl IntoIterator<Item = T>) {
        let mut head = ptr::null_mut();
        let mut len = 0;
        for value in items {
            head = Box::into_raw(Box::new(Node {
                value: ManuallyDrop::new(value),
                next: head,
            }));
            len += 1;
        }

        let old = std::mem::replace(self.head.get_mut(), head);
        *self.len.get_mut() = len;

        // Safety: we have `&mut self`, so no operation holds a reference
        // into the old chain.
        unsafe { drop_chain(old) }
    }
}

impl<T> BasicStack<T>
where
    T: Copy,
{
    /// Returns a copy of the current top without removing it.
    ///
    /// Advisory only: the value may already have been popped by the time
    /// the caller inspects it.
    pub fn peek(&self) -> Option<T> {
        let guard = self.collector.enter();
        let head = guard.protect(&self.head, Ordering::Acquire);
        if head.is_null() {
            return None;
        }

        // Safety: the guard keeps the node from being reclaimed, and the
        // value slot is only written before the node is published. A
        // concurrent pop moves the value out with a plain read, which is
        // fine to overlap; `T: Copy` keeps the duplicated bytes inert
        // even if the popped original has since been dropped.
        Some(unsafe { *(*head).value })
    }
}

impl<T: Send> Stack<T> for BasicStack<T> {
    fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: ManuallyDrop::new(value),
            next: ptr::null_mut(),
        }));

        loop {
            let head = self.head.load(Ordering::Relaxed);

            // The node is unpublished, so the plain store is fine.
            unsafe { (*node).next = head }

            if self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
    }

    fn pop(&self) -> Option<T> {
        let guard = self.collector.enter();
        loop {
            let head = guard.protect(&self.head, Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            // Safety: the guard keeps `head` alive even if another thread
            // pops and retires it while we are looking.
            let next = unsafe { (*head).next };

            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);

                // Safety: the winning CAS transferred ownership of the
                // value to us. The node itself is freed by the collector
                // once no guard can still be holding it; `ManuallyDrop`
                // keeps that from double-dropping the value.
                let value = unsafe { ptr::read(&(*head).value) };
                unsafe { guard.defer_retire(head, reclaim::boxed) };

                return Some(ManuallyDrop::into_inner(value));
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<T> Default for BasicStack<T> {
    fn default() -> BasicStack<T> {
        BasicStack::new()
    }
}

impl<T> FromIterator<T> for BasicStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> BasicStack<T> {
        let mut stack = BasicStack::new();
        stack.init(iter);
        stack
    }
}

impl<T> Drop for BasicStack<T> {
    fn drop(&mut self) {
        // Safety: `&mut self`; anything the collector still owes us is
        // reclaimed when it drops, but the live chain is ours to free.
        unsafe { drop_chain(*self.head.get_mut()) }
    }
}

unsafe fn drop_chain<T>(mut head: *mut Node<T>) {
    while !head.is_null() {
        // Safety: the caller guarantees exclusive access to the chain.
        let mut node = unsafe { Box::from_raw(head) };
        head = node.next;
        unsafe { ManuallyDrop::drop(&mut node.value) }
    }
}

unsafe impl<T: Send> Send for BasicStack<T> {}
unsafe impl<T: Send> Sync for BasicStack<T> {}
