use std::time::Duration;

use moka::sync::Cache;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeStatus {
    Success,
    Failed,
}

/// Short-lived per-message outcomes published by the event-log consumers so
/// producers can poll whether their message has landed.
pub struct StatusBoard {
    statuses: Cache<String, ConsumeStatus>,
}

impl StatusBoard {
    pub fn new(ttl: Duration) -> Self {
        StatusBoard {
            statuses: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn set(&self, unique_key: String, status: ConsumeStatus) {
        self.statuses.insert(unique_key, status);
    }

    pub fn get(&self, unique_key: &str) -> Option<ConsumeStatus> {
        self.statuses.get(unique_key)
    }

    pub fn remove(&self, unique_key: &str) {
        self.statuses.invalidate(unique_key);
    }

    /// Poll up to `retry` times, sleeping `interval` between polls. Returns
    /// Ok(true) once the message was consumed successfully, Ok(false) if no
    /// outcome appeared in time, and an error if consumption failed. The
    /// entry is cleared as soon as an outcome is observed.
    pub async fn check_if_consumed(
        &self,
        unique_key: &str,
        retry: u32,
        interval: Duration,
    ) -> Result<bool> {
        for _ in 0..retry {
            tokio::time::sleep(interval).await;
            let Some(status) = self.get(unique_key) else {
                continue;
            };
            self.remove(unique_key);
            return match status {
                ConsumeStatus::Success => Ok(true),
                ConsumeStatus::Failed => Err(Error::Internal(format!(
                    "message {unique_key} was consumed but failed"
                ))),
            };
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_outcomes_are_cleared_on_poll() {
        let board = StatusBoard::new(Duration::from_secs(60));
        board.set("create_1001".into(), ConsumeStatus::Success);

        let consumed = board
            .check_if_consumed("create_1001", 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(consumed);
        assert!(board.get("create_1001").is_none());
    }

    #[tokio::test]
    async fn failed_outcomes_surface_as_errors() {
        let board = StatusBoard::new(Duration::from_secs(60));
        board.set("remove_7".into(), ConsumeStatus::Failed);

        let err = board
            .check_if_consumed("remove_7", 2, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn missing_outcomes_return_false() {
        let board = StatusBoard::new(Duration::from_secs(60));
        let consumed = board
            .check_if_consumed("nope", 2, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(!consumed);
    }
}
