use std::time::Duration;
use tracing::warn;

/// Classifies errors for the retry executor
///
/// Temporary errors (timeouts, rate limits, server-side failures) are
/// retried with backoff; everything else is returned immediately.
pub trait Retryable {
    fn is_temporary(&self) -> bool;
}

/// Observability hook invoked before every backoff sleep
pub trait RetryObserver: Send + Sync {
    /// # Arguments
    /// * `attempt` - The attempt that just failed (1-indexed)
    /// * `delay` - Backoff about to be slept
    /// * `error` - Rendered error of the failed attempt
    fn on_retry(&self, attempt: u32, delay: Duration, error: &str);
}

/// Observer that logs each retry
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new("operation")
    }
}

impl RetryObserver for TracingObserver {
    fn on_retry(&self, attempt: u32, delay: Duration, error: &str) {
        warn!(
            target: "tether::retry",
            label = %self.label,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error,
            "Temporary error, retrying"
        );
    }
}

/// Observer that does nothing
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_retry(&self, _attempt: u32, _delay: Duration, _error: &str) {}
}
