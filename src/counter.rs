//! Shared request counter.
//!
//! # Responsibilities
//! - Hold the value mutated by every `/count` request
//! - Expose the current value to the metrics observer
//!
//! # Design Decisions
//! - Lock-free: a single `AtomicI64` with sequentially consistent ordering
//! - `add` returns the value produced by that exact update, never a value
//!   from between two concurrent adds

use std::sync::atomic::{AtomicI64, Ordering};

use crate::observability::metrics::Observable;

/// An integer shared by concurrent request handlers.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    /// Create a counter starting at `initial`.
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    /// Add `delta` and return the post-update value.
    ///
    /// Overflow wraps, matching the behaviour of the underlying atomic.
    pub fn add(&self, delta: i64) -> i64 {
        self.value
            .fetch_add(delta, Ordering::SeqCst)
            .wrapping_add(delta)
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Observable for Counter {
    fn observe(&self) -> i64 {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_returns_new_value() {
        let counter = Counter::default();
        assert_eq!(counter.add(5), 5);
        assert_eq!(counter.add(-2), 3);
        assert_eq!(counter.get(), 3);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let counter = Arc::new(Counter::default());
        let threads = 8;
        let per_thread = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        counter.add(1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get(), threads * per_thread);
    }

    #[test]
    fn test_each_add_observes_a_distinct_value() {
        let counter = Arc::new(Counter::default());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || (0..1_000).map(|_| counter.add(1)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "value {value} returned twice");
            }
        }

        assert_eq!(seen.len(), 4_000);
        assert_eq!(seen.iter().max(), Some(&4_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_sum() {
        let counter = Arc::new(Counter::new(10));
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    counter.add(2);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(counter.get(), 10 + 16 * 250 * 2);
        assert_eq!(counter.observe(), counter.get());
    }
}
