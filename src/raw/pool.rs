use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Mutex;

// The maximum number of chunks a pool can allocate.
const MAX_CHUNKS: usize = 32;

// The maximum number of slots a pool can hold.
const MAX_CAPACITY: u64 = 1 << 31;

// Mask for the claim half of the cursor.
const COUNT_MASK: u64 = 0xffff_ffff;

/// Batch-allocated, pointer-stable slot storage.
///
/// Slots are allocated in chunks of doubling size, so growing the pool
/// never moves a slot that has already been handed out. A single atomic
/// word packs the next unclaimed slot index (low half) and the published
/// capacity (high half): claiming a slot is a CAS on that word and is
/// lock-free as long as the claimed index is within capacity. Only
/// allocating a new chunk takes the growth lock.
///
/// A slot index is handed out exactly once; whether it is ever handed
/// back is the business of the stack variant built on top.
pub(crate) struct Pool<N> {
    /// The allocation cursor: (next-free-index, capacity), packed.
    cursor: AtomicU64,

    /// Published chunk pointers. Chunk `k` holds `first_size << k` slots.
    chunks: [AtomicPtr<N>; MAX_CHUNKS],

    /// Serializes chunk allocation. Holds the number of allocated chunks.
    grow: Mutex<usize>,

    /// The size of chunk 0.
    first_size: u32,

    _marker: PhantomData<Box<[N]>>,
}

impl<N> Pool<N>
where
    N: Default,
{
    /// Creates an empty pool whose first chunk will hold at least
    /// `first_size` slots.
    pub fn new(first_size: usize) -> Pool<N> {
        Pool {
            cursor: AtomicU64::new(0),
            chunks: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            grow: Mutex::new(0),
            first_size: first_size.clamp(1, MAX_CAPACITY as usize / 2) as u32,
            _marker: PhantomData,
        }
    }

    /// Claims an unused slot index.
    ///
    /// Lock-free unless the claimed index is beyond the published
    /// capacity, in which case the buffer is grown under a lock.
    pub fn acquire(&self) -> u32 {
        loop {
            let cursor = self.cursor.load(Ordering::Acquire);
            let (count, capacity) = (cursor & COUNT_MASK, cursor >> 32);
            assert!(count < COUNT_MASK, "slot cursor overflow");

            if self
                .cursor
                .compare_exchange_weak(cursor, cursor + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // The claimed index is ours whether or not it is backed by
            // storage yet. If it is beyond the published capacity, grow
            // until it isn't; the index is returned either way, so no
            // slot is ever skipped over a growth event.
            let claimed = count as u32;
            if count >= capacity {
                self.grow_to(claimed);
            }

            return claimed;
        }
    }

    /// Returns the number of slots claimed so far.
    #[cfg(test)]
    pub fn allocated(&self) -> usize {
        (self.cursor.load(Ordering::Relaxed) & COUNT_MASK) as usize
    }

    /// Grows the pool until `index` is within capacity.
    #[cold]
    fn grow_to(&self, index: u32) {
        let mut chunks = self.grow.lock().unwrap();

        // Another thread may have grown the pool while we waited on the
        // lock; re-check under it.
        while self.capacity(*chunks) <= index as u64 {
            let size = (self.first_size as u64) << *chunks;
            let capacity = self.capacity(*chunks) + size;
            assert!(
                *chunks < MAX_CHUNKS && capacity <= MAX_CAPACITY,
                "pool capacity exhausted"
            );

            let chunk: Box<[N]> = (0..size).map(|_| N::default()).collect();
            self.chunks[*chunks].store(Box::into_raw(chunk) as *mut N, Ordering::Release);
            *chunks += 1;

            // Publish the new capacity in the cursor's high half. The
            // claim half is concurrently advancing, so this has to be a
            // CAS loop rather than a store.
            loop {
                let cursor = self.cursor.load(Ordering::Relaxed);
                let new = (cursor & COUNT_MASK) | (capacity << 32);
                if self
                    .cursor
                    .compare_exchange_weak(cursor, new, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            }
        }
    }
}

impl<N> Pool<N> {
    /// Returns the slot for a claimed index.
    #[inline]
    pub fn get(&self, index: u32) -> &N {
        let (chunk, offset) = self.locate(index);
        let ptr = self.chunks[chunk].load(Ordering::Acquire);
        debug_assert!(!ptr.is_null());

        // Safety: `index` was claimed, so its chunk has been allocated and
        // published, and chunks are never moved or freed before the pool
        // itself is dropped.
        unsafe { &*ptr.add(offset) }
    }

    // The total capacity of the first `chunks` chunks.
    #[inline]
    fn capacity(&self, chunks: usize) -> u64 {
        (self.first_size as u64) * ((1u64 << chunks) - 1)
    }

    // Maps a slot index to its chunk and the offset within it.
    #[inline]
    fn locate(&self, index: u32) -> (usize, usize) {
        let first = self.first_size as usize;
        let chunk = (index as usize / first + 1).ilog2() as usize;
        let offset = index as usize - first * ((1 << chunk) - 1);
        (chunk, offset)
    }
}

impl<N> Drop for Pool<N> {
    fn drop(&mut self) {
        let chunks = *self.grow.get_mut().unwrap();
        for k in 0..chunks {
            let size = (self.first_size as usize) << k;
            let ptr = *self.chunks[k].get_mut();
            // Safety: chunk `k` was allocated as a boxed slice of `size`
            // slots and never freed.
            unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, size))) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn claims_are_contiguous() {
        // Regression test for the growth path: the index claimed by the
        // thread that triggers a growth event must itself be used, not
        // skipped.
        let pool: Pool<AtomicUsize> = Pool::new(1);
        for i in 0..100 {
            assert_eq!(pool.acquire(), i);
        }
        assert_eq!(pool.allocated(), 100);
    }

    #[test]
    fn slots_are_distinct_and_stable() {
        let pool: Pool<AtomicUsize> = Pool::new(2);
        let indices: Vec<u32> = (0..64).map(|_| pool.acquire()).collect();

        for &i in &indices {
            pool.get(i).store(i as usize + 1, Ordering::Relaxed);
        }

        // No two indices alias the same slot, and growth did not move
        // any slot out from under us.
        for &i in &indices {
            assert_eq!(pool.get(i).load(Ordering::Relaxed), i as usize + 1);
        }
    }

    #[test]
    fn locate_boundaries() {
        let pool: Pool<AtomicUsize> = Pool::new(32);
        assert_eq!(pool.locate(0), (0, 0));
        assert_eq!(pool.locate(31), (0, 31));
        assert_eq!(pool.locate(32), (1, 0));
        assert_eq!(pool.locate(95), (1, 63));
        assert_eq!(pool.locate(96), (2, 0));
    }

    #[test]
    fn concurrent_claims_are_unique() {
        const CLAIMS: usize = if cfg!(miri) { 64 } else { 1 << 14 };

        let pool: Pool<AtomicUsize> = Pool::new(1);
        let threads = thread::available_parallelism().unwrap().get().min(8);
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for _ in 0..threads {
                let pool = &pool;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    for _ in 0..CLAIMS {
                        let i = pool.acquire();
                        // Each slot must be issued exactly once.
                        assert_eq!(pool.get(i).fetch_add(1, Ordering::Relaxed), 0);
                    }
                });
            }
        });

        assert_eq!(pool.allocated(), threads * CLAIMS);
    }
}
