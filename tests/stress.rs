mod common;

use lfstack::{BasicStack, BufferedStack, PackedStack, RecyclingStack, Stack};
use rand::prelude::*;

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

// A mix of pushes and pops biased toward pushing, run from every thread.
// Tracking a signed per-value counter proves that no value is ever lost
// or duplicated: after draining, every counter must be back at zero.
#[test]
fn conservation() {
    const OPS: usize = if cfg!(miri) { 200 } else { 100_000 };
    const MAX_VAL: usize = 100;

    common::with_stacks::<usize>(|name, make| {
        let stack = make();
        let pushed: Vec<AtomicIsize> = (0..=MAX_VAL).map(|_| AtomicIsize::new(0)).collect();
        let threads = common::threads();
        let barrier = Barrier::new(threads);

        thread::scope(|s| {
            for _ in 0..threads {
                let stack = &stack;
                let pushed = &pushed;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    barrier.wait();
                    for _ in 0..OPS {
                        if rng.gen_range(0..10) >= 4 {
                            let v = rng.gen_range(0..=MAX_VAL);
                            pushed[v].fetch_add(1, Ordering::Relaxed);
                            stack.push(v);
                        } else if let Some(v) = stack.pop() {
                            pushed[v].fetch_sub(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        let mut drained = 0;
        while let Some(v) = stack.pop() {
            pushed[v].fetch_sub(1, Ordering::Relaxed);
            drained += 1;
        }
        assert!(
            stack.is_empty(),
            "{name}: stack not empty after draining {drained} items"
        );

        for (v, count) in pushed.iter().enumerate() {
            assert_eq!(
                count.load(Ordering::Relaxed),
                0,
                "{name}: unbalanced count for value {v}"
            );
        }
    });
}

// Every pushed token is unique, so popping one twice means two operations
// were issued the same node or slot while it was still in use.
#[test]
fn no_double_issue() {
    const PER_THREAD: usize = if cfg!(miri) { 100 } else { 1 << 14 };

    common::with_stacks::<usize>(|name, make| {
        let stack = make();
        let threads = common::threads();
        let barrier = Barrier::new(threads);
        let seen: Vec<AtomicUsize> = (0..threads * PER_THREAD)
            .map(|_| AtomicUsize::new(0))
            .collect();

        thread::scope(|s| {
            for t in 0..threads {
                let stack = &stack;
                let seen = &seen;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut rng = rand::thread_rng();
                    barrier.wait();
                    for i in 0..PER_THREAD {
                        stack.push(t * PER_THREAD + i);

                        // Interleave pops to churn nodes through the
                        // free lists while other threads are pushing.
                        if rng.gen_bool(0.5) {
                            if let Some(token) = stack.pop() {
                                assert_eq!(
                                    seen[token].fetch_add(1, Ordering::Relaxed),
                                    0,
                                    "{name}: token {token} popped twice"
                                );
                            }
                        }
                    }
                });
            }
        });

        while let Some(token) = stack.pop() {
            assert_eq!(
                seen[token].fetch_add(1, Ordering::Relaxed),
                0,
                "{name}: token {token} popped twice"
            );
        }

        for (token, count) in seen.iter().enumerate() {
            assert_eq!(
                count.load(Ordering::Relaxed),
                1,
                "{name}: token {token} lost"
            );
        }
    });
}

// Peeks racing pops and recycling pushes: a peek may observe any value
// currently on the stack or none at all, but never bytes that were not
// pushed, even while the node it is reading is popped, dropped, and its
// slot rewritten underneath it.
fn churn_and_peek<S>(stack: &S, peek: impl Fn(&S) -> Option<u64> + Sync)
where
    S: Stack<u64>,
{
    const OPS: usize = if cfg!(miri) { 200 } else { 1 << 16 };
    const MAX_VAL: u64 = 64;

    let threads = common::threads().max(2);
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let barrier = &barrier;
            let peek = &peek;
            s.spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();

                if t % 2 == 0 {
                    // Churn values through the stack so peekers race
                    // live pops and slot reuse.
                    for _ in 0..OPS {
                        if rng.gen_bool(0.5) {
                            stack.push(rng.gen_range(1..=MAX_VAL));
                        } else if let Some(v) = stack.pop() {
                            assert!((1..=MAX_VAL).contains(&v), "popped {v:#x}");
                        }
                    }
                } else {
                    for _ in 0..OPS {
                        if let Some(v) = peek(stack) {
                            assert!(
                                (1..=MAX_VAL).contains(&v),
                                "peeked a value that was never pushed: {v:#x}"
                            );
                        }
                    }
                }
            });
        }
    });
}

#[test]
fn basic_peek_races_pop() {
    churn_and_peek(&BasicStack::new(), |stack| stack.peek());
}

#[test]
fn recycling_peek_races_reuse() {
    churn_and_peek(&RecyclingStack::new(), |stack| stack.peek());
}

#[test]
fn buffered_peek_races_pop() {
    churn_and_peek(&BufferedStack::with_capacity(1), |stack| stack.peek());
}

#[test]
fn packed_peek_races_reuse() {
    churn_and_peek(&PackedStack::new(), |stack| stack.peek());
}

// Concurrent pushes racing the buffer growth lock: every item must
// remain retrievable exactly once no matter how many growth events its
// push straddled.
#[test]
fn buffered_growth_under_contention() {
    const PER_THREAD: usize = if cfg!(miri) { 100 } else { 1 << 12 };

    let stack = BufferedStack::with_capacity(1);
    let threads = common::threads();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let stack = &stack;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    stack.push(t * PER_THREAD + i);
                }
            });
        }
    });

    assert_eq!(stack.len(), threads * PER_THREAD);

    let mut seen = vec![false; threads * PER_THREAD];
    while let Some(token) = stack.pop() {
        assert!(!seen[token], "token {token} popped twice");
        seen[token] = true;
    }

    assert!(seen.iter().all(|&s| s), "missing tokens after drain");
}
