//! Byte-wise atomic access to plain value slots.
//!
//! The pool-backed stacks let `peek` read a slot that a concurrent `pop`
//! or a recycling `push` is writing. The head-word revalidation in `peek`
//! discards anything read during such an overlap, but the overlapping
//! accesses themselves still have to be atomic. These helpers copy a
//! value one byte at a time through `AtomicU8`, so a read may freely
//! overlap a write; an overlapped read yields torn bytes the caller must
//! throw away.
//!
//! All orderings are `Relaxed`. Publication is carried by the head-word
//! CAS that follows a store and the head-word load that precedes a load.

use std::mem::{self, MaybeUninit};
use std::sync::atomic::{AtomicU8, Ordering};

/// Reads the value at `src` byte by byte.
///
/// # Safety
///
/// `src` must be valid for reads. The result is only initialized if no
/// [`store`] to `src` overlapped the call; the caller must establish that
/// before calling `assume_init`.
pub(crate) unsafe fn load<T>(src: *const T) -> MaybeUninit<T> {
    let mut out = MaybeUninit::<T>::uninit();
    let src = src.cast::<AtomicU8>();
    let dst = out.as_mut_ptr().cast::<u8>();

    for i in 0..mem::size_of::<T>() {
        // Safety: `AtomicU8` has the size and alignment of `u8`, so every
        // byte of a valid `T` is a valid `AtomicU8`.
        unsafe { *dst.add(i) = (*src.add(i)).load(Ordering::Relaxed) }
    }

    out
}

/// Overwrites the value at `dst` byte by byte, like `ptr::write`: the
/// previous contents are not dropped.
///
/// # Safety
///
/// `dst` must be valid for writes and the caller must own the slot; the
/// only access allowed to overlap this one is a [`load`].
pub(crate) unsafe fn store<T>(dst: *mut T, value: T) {
    let value = MaybeUninit::new(value);
    let src = value.as_ptr().cast::<u8>();
    let dst = dst.cast::<AtomicU8>();

    for i in 0..mem::size_of::<T>() {
        // Safety: as in `load`.
        unsafe { (*dst.add(i)).store(*src.add(i), Ordering::Relaxed) }
    }
}
