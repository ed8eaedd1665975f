//! Fixed-attempt, fixed-backoff retry for external writes

use super::{SyncError, SyncResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for external ledger calls
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `backoff`: 1000ms between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(op = name, attempts = attempt, error = %e, "External write retries exhausted");
                    return Err(SyncError::RetriesExhausted {
                        op: name.to_string(),
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(op = name, attempt, error = %e, "External write failed, retrying");
                    sleep(self.backoff).await;
                }
            }
        }
    }
}
