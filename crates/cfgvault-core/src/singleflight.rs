//! Per-key request coalescing
//!
//! Concurrent callers asking for the same key share one execution of the
//! work future; followers receive a clone of the leader's result. The slot
//! is cleared once the work completes so later calls (after a failure, for
//! instance) run again.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Coalesces concurrent work per key
#[derive(Debug)]
pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create empty group
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Run `work` for `key` unless a run is already in flight, in which
    /// case wait for it and return its result
    ///
    /// If the leader is cancelled, one of the waiters takes over.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let slot = Arc::clone(
            self.slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        let value = slot.get_or_init(work).await.clone();
        self.slots
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        value
    }

    /// Number of keys with work in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_calls_share_one_execution() {
        let group = Arc::new(SingleFlight::<u32, u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let group = group.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                group
                    .run(1, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_not_remembered() {
        let group = SingleFlight::<&str, Result<u8, String>>::new();
        let first = group.run("k", || async { Err("boom".to_string()) }).await;
        let second = group.run("k", || async { Ok(1) }).await;
        assert_eq!(first, Err("boom".to_string()));
        assert_eq!(second, Ok(1));
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let group = SingleFlight::<u8, u8>::new();
        let (a, b) = tokio::join!(
            group.run(1, || async { 1 }),
            group.run(2, || async { 2 })
        );
        assert_eq!((a, b), (1, 2));
    }
}
