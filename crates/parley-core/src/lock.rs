//! Per-key async locks.
//!
//! Each key gets a `tokio::sync::Mutex` that lives in the map only while
//! someone holds or awaits it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created, self-cleaning async locks.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        KeyGuard {
            guard: Some(lock.lock_owned().await),
            key: key.to_string(),
            owner: self,
        }
    }

    /// Number of keys currently locked or awaited.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one key. Released on drop.
pub(crate) struct KeyGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    owner: &'a KeyedLocks,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own handle left: nobody holds or waits for the key.
        self.owner
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_is_reclaimed() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.acquire("general").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                tokio::spawn(async move {
                    let _guard = locks.acquire("alice").await;
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(locks.len(), 0);
    }
}
