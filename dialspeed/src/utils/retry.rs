use std::future::Future;
use std::time::Duration;

use crate::utils::time::sleep_with_jitter;

/// Backoff schedule for short remote operations (uploads, folder
/// creation). Delays double per attempt, are jittered, and never exceed
/// the cap. Chunked file transfers carry their own policy in
/// `storage::download`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        (self.base_delay * factor).min(self.max_delay)
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent,
    /// surfacing the last error.
    pub async fn run<T, F, Fut>(&self, operation: F) -> common::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = common::Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last = Some(e);
                    if attempt + 1 < attempts {
                        sleep_with_jitter(self.delay(attempt)).await;
                    }
                }
            }
        }

        Err(last.unwrap_or(common::Error::MaxRetriesExceeded))
    }
}
