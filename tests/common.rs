#![allow(dead_code)]

use lfstack::{BasicStack, BufferedStack, MutexStack, PackedStack, RecyclingStack, Stack};

// Run the test on every stack variant.
pub fn with_stacks<T: Send + 'static>(mut test: impl FnMut(&str, &dyn Fn() -> Box<dyn Stack<T>>)) {
    test("basic", &|| Box::new(BasicStack::new()));
    test("recycling", &|| Box::new(RecyclingStack::new()));
    test("buffered", &|| Box::new(BufferedStack::new()));

    // A tiny first chunk forces a buffer growth event on almost every
    // fresh allocation.
    test("buffered_small", &|| Box::new(BufferedStack::with_capacity(1)));

    test("packed", &|| Box::new(PackedStack::new()));
    test("mutex", &|| Box::new(MutexStack::new()));
}

// Prints a log message if `RUST_LOG=debug` is set.
#[macro_export]
macro_rules! debug {
    ($($x:tt)*) => {
        if std::env::var("RUST_LOG").as_deref() == Ok("debug") {
            println!($($x)*);
        }
    };
}

// Returns the number of threads to use for stress testing.
pub fn threads() -> usize {
    if cfg!(miri) {
        2
    } else {
        num_cpus::get_physical().next_power_of_two().min(8)
    }
}
