use std::sync::Mutex;

use crate::Stack;

/// A mutex-guarded stack.
///
/// No algorithmic content: every operation takes one exclusive lock over
/// a `Vec`. Kept as a correctness and performance baseline for the
/// lock-free variants.
pub struct MutexStack<T> {
    items: Mutex<Vec<T>>,
}

impl<T> MutexStack<T> {
    /// Creates an empty stack.
    pub fn new() -> MutexStack<T> {
        MutexStack {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Bulk-loads the stack, keeping any prior contents below the new
    /// ones. The last item ends up on top.
    pub fn init(&mut self, items: impl IntoIterator<Item = T>) {
        self.items.get_mut().unwrap().extend(items);
    }
}

impl<T> MutexStack<T>
where
    T: Clone,
{
    /// Returns a copy of the current top without removing it.
    pub fn peek(&self) -> Option<T> {
        self.items.lock().unwrap().last().cloned()
    }
}

impl<T: Send> Stack<T> for MutexStack<T> {
    fn push(&self, value: T) {
        self.items.lock().unwrap().push(value);
    }

    fn pop(&self) -> Option<T> {
        self.items.lock().unwrap().pop()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

impl<T> Default for MutexStack<T> {
    fn default() -> MutexStack<T> {
        MutexStack::new()
    }
}

impl<T> FromIterator<T> for MutexStack<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> MutexStack<T> {
        MutexStack {
            items: Mutex::new(iter.into_iter().collect()),
        }
    }
}
