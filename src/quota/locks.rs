use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockKey = (Uuid, String);

/// One async mutex per (subscription, feature) pair. Serializes the
/// read-recalculate-write sequence of the quota engine within a process.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

/// Held lock on one key. Releasing the last handle to a key removes its
/// mutex from the map.
pub struct KeyedLockGuard<'a> {
    locks: &'a KeyedLocks,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, subscription_id: Uuid, feature_id: &str) -> KeyedLockGuard<'_> {
        let key = (subscription_id, feature_id.to_string());
        // The map shard guard must be released before awaiting the mutex.
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedLockGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a contended key survives.
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let subscription = Uuid::new_v4();

        let guard = locks.lock(subscription, "teams").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(subscription, "teams").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let subscription = Uuid::new_v4();

        let _teams = locks.lock(subscription, "teams").await;
        let minutes = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(subscription, "build.minutes"),
        )
        .await;
        assert!(minutes.is_ok());
        assert_eq!(locks.len(), 2);

        drop(minutes);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn released_keys_leave_the_map() {
        let locks = KeyedLocks::new();
        for _ in 0..100 {
            let _guard = locks.lock(Uuid::new_v4(), "mails").await;
        }
        assert!(locks.is_empty());
    }
}
