#![doc = include_str!("../README.md")]

mod basic;
mod buffered;
mod mutex;
mod packed;
mod raw;
mod recycling;

pub use basic::BasicStack;
pub use buffered::BufferedStack;
pub use mutex::MutexStack;
pub use packed::PackedStack;
pub use recycling::RecyclingStack;

/// The contract shared by every stack variant.
///
/// All operations are safe to call from any number of threads. The
/// lock-free variants may spin under contention but never block, with the
/// exception of the buffer-growth slow path in [`BufferedStack`].
pub trait Stack<T>: Send + Sync {
    /// Pushes a value onto the stack.
    ///
    /// Always eventually succeeds; there is no capacity limit.
    fn push(&self, value: T);

    /// Removes and returns the current top of the stack.
    ///
    /// Returns `None` only when the stack was observed empty. Callers
    /// should treat this as "no items available now", not as evidence of
    /// permanent emptiness; more items may arrive from other threads.
    fn pop(&self) -> Option<T>;

    /// Returns the number of items on the stack.
    ///
    /// The count is eventually consistent: it converges to the true count
    /// once all in-flight operations complete, but may be transiently
    /// stale when read concurrently. It is never negative.
    fn len(&self) -> usize;

    /// Returns `true` if the stack was observed empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
