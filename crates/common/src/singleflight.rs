use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::{Error, Result};

type Outcome<T> = std::result::Result<T, Arc<Error>>;

/// Collapses concurrent computations per key: the first caller becomes the
/// leader and drives the future to completion, every other caller sharing the
/// key receives the same result through a watch channel. The completed result
/// (success or error) stays visible until a forget timer releases the key, so
/// transient errors never cache for long. Waiting is bounded by a per-group
/// timeout and fails with `Timeout`; the leader's computation itself is not
/// cancelled by waiters timing out.
pub struct Singleflight<T> {
    calls: Arc<DashMap<String, watch::Receiver<Option<Outcome<T>>>>>,
    timeout: Duration,
    forget: Duration,
}

impl<T: Clone + Send + Sync + 'static> Singleflight<T> {
    pub fn new(timeout: Duration, forget: Duration) -> Self {
        Singleflight {
            calls: Arc::new(DashMap::new()),
            timeout,
            forget,
        }
    }

    pub async fn run<Fut>(&self, key: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let rx = match self.calls.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());

                let calls = Arc::clone(&self.calls);
                let forget = self.forget;
                let key = key.to_string();
                tokio::spawn(async move {
                    let result = fut.await.map_err(Arc::new);
                    let _ = tx.send(Some(result));
                    tokio::time::sleep(forget).await;
                    calls.remove(&key);
                });
                rx
            }
        };

        match tokio::time::timeout(self.timeout, wait(rx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

async fn wait<T: Clone>(mut rx: watch::Receiver<Option<Outcome<T>>>) -> Result<T> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return outcome.map_err(Error::Shared);
        }
        if rx.changed().await.is_err() {
            return Err(Error::Internal("single-flight leader dropped".into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let group = Arc::new(Singleflight::<i64>::new(
            Duration::from_secs(1),
            Duration::from_millis(200),
        ));
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let group = Arc::clone(&group);
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                group
                    .run("subject:1_42", async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_shared_then_forgotten() {
        let group = Singleflight::<i64>::new(Duration::from_secs(1), Duration::from_millis(20));

        let err = group
            .run("k", async { Err(Error::NoSuchComment) })
            .await
            .unwrap_err();
        assert!(matches!(err.root(), Error::NoSuchComment));

        // After the forget interval the key computes afresh.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(group.in_flight(), 0);
        let v = group.run("k", async { Ok(3) }).await.unwrap();
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn waiters_time_out_without_cancelling_the_leader() {
        let group = Singleflight::<i64>::new(Duration::from_millis(10), Duration::from_millis(500));

        let err = group
            .run("slow", async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(1)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        // The leader finishes in the background; a later caller inside the
        // forget window observes its cached result.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let v = group.run("slow", async { Ok(99) }).await.unwrap();
        assert_eq!(v, 1);
    }
}
