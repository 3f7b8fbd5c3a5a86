use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// On-demand mutexes keyed by string, used to serialize a user racing with
/// themselves on one comment's like/hate toggle.
///
/// Entries are created on first lock and removed when the last holder
/// releases. Removal happens under the map's shard lock and only when the
/// refcount proves no other task holds or awaits the mutex, so a stale entry
/// can never hand out a second mutex instance for a live key.
#[derive(Default)]
pub struct KeyedMutex {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct KeyedGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            _guard: guard,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // strong_count == 2 here means: the map's entry plus our clone. Any
        // waiter queued on lock_owned holds a third reference, which keeps the
        // entry alive for them.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_holders_of_the_same_key() {
        let locks = Arc::new(KeyedMutex::new());
        let active = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("5_1001_42_1").await;
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_micros(100)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // No leak once every holder has released.
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = KeyedMutex::new();
        let a = locks.lock("a").await;
        let b = locks.lock("b").await;
        assert_eq!(locks.len(), 2);
        drop(a);
        drop(b);
        assert!(locks.is_empty());
    }
}
