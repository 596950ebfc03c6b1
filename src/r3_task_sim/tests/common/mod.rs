//! Utilities shared by the integration tests
#![allow(dead_code)]
use r3_task_sim::r3_task::kernel::{raw::KernelBase, Task, TaskBody};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks the progress of a test across tasks.
pub struct SeqTracker {
    counter: AtomicUsize,
}

impl SeqTracker {
    pub const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Assert that the counter is equal to `old` and then replace it with
    /// `new`.
    ///
    /// Only call this from the controller or from a task body that doesn't
    /// return through a panic. A panic in a task thread aborts the process.
    #[track_caller]
    pub fn expect_and_replace(&self, old: usize, new: usize) {
        let got = self.counter.load(Ordering::Relaxed);
        log::debug!("{} (expected: {}) → {}", got, old, new);
        assert_eq!(got, old, "expected {}, got {}", old, got);
        self.counter.store(new, Ordering::Relaxed);
    }

    /// Like `expect_and_replace`, but records a mismatch instead of
    /// panicking. For use in task bodies.
    pub fn step(&self, old: usize, new: usize, mismatches: &AtomicUsize) {
        let got = self.counter.load(Ordering::Relaxed);
        log::debug!("{} (expected: {}) → {}", got, old, new);
        if got != old {
            log::error!("expected {}, got {}", old, got);
            mismatches.fetch_add(1, Ordering::Relaxed);
        }
        self.counter.store(new, Ordering::Relaxed);
    }
}

/// A body that increments a counter once and returns.
#[derive(Debug, Default)]
pub struct CountOnce {
    count: AtomicUsize,
}

impl CountOnce {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl<System: KernelBase> TaskBody<System> for CountOnce {
    fn run(&self, _: &Task<System>) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn init_logger() {
    let _ = r3_task_sim::env_logger::try_init();
}
