//! Retry with exponential backoff
//!
//! ```text
//! attempt 1 ──fail(temporary)──> sleep(backoff(1)) ──> attempt 2 ──fail──> ...
//!           ──fail(permanent)──> return error
//! attempt N ──fail(any)────────> return error (no sleep)
//! ```
//!
//! Attempts are strictly sequential: the operation is never invoked
//! concurrently with itself within one `run` call.

use super::backoff::ExponentialBackoff;
use crate::traits::{RetryObserver, Retryable, TracingObserver};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry policy, immutable once an operation starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Backoff slept after the given failed attempt (1-indexed)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        ExponentialBackoff::new(self.initial_backoff, self.max_backoff).delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            observer: Arc::new(TracingObserver::default()),
        }
    }

    /// Replace the retry observer
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_temporary() || attempt >= max_attempts {
                return Err(error);
            }

            let delay = self.policy.backoff_for(attempt);
            self.observer.on_retry(attempt, delay, &error.to_string());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
