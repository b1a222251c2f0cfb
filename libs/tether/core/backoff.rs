use std::time::Duration;

/// Exponential backoff schedule
///
/// Delay before attempt `n` (1-indexed) is `initial * 2^(n-1)`, capped at `max`.
/// Shared by the retry executor and the reconnect procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff schedule
    ///
    /// # Arguments
    /// * `initial` - Delay after the first failure
    /// * `max` - Upper bound for any single delay
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay for the given 1-indexed attempt
    ///
    /// Saturates instead of overflowing for large attempt numbers.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        let initial_ms = self.initial.as_millis().min(u64::MAX as u128) as u64;
        let delay_ms = initial_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max)
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_until_cap() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (1..=8).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_overflow_safety() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(3600));
        assert_eq!(backoff.delay(100), Duration::from_secs(3600));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(250), Duration::from_secs(5));
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(1), Duration::from_millis(250));
    }
}
