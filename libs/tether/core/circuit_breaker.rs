//! Three-state circuit breaker
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────> Open
//!     ^                                │ allow() after timeout
//!     │ 3 consecutive successes        v
//!     └──────────────────────────── HalfOpen
//!                                      │ any failure
//!                                      └──────> Open (fresh timeout)
//! ```
//!
//! The Open → HalfOpen transition happens inside `allow()`; there is no
//! background timer. All state lives behind one mutex per breaker.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Successes needed in HalfOpen before closing again
pub const HALF_OPEN_SUCCESSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// # Arguments
    /// * `name` - Label used in logs (connection id, provider name)
    /// * `threshold` - Consecutive failures that open the circuit
    /// * `timeout` - How long the circuit stays open before probing
    pub fn new(name: impl Into<String>, threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt: None,
            }),
        }
    }

    /// Whether a call may proceed
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let ready = inner
                    .next_attempt
                    .map_or(true, |next| Instant::now() >= next);
                if ready {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    info!(breaker = %self.name, "Circuit half-open, probing");
                }
                ready
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= HALF_OPEN_SUCCESSES {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.next_attempt = None;
                info!(breaker = %self.name, "Circuit closed");
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.threshold,
            CircuitState::Open => false,
        };

        if trip {
            inner.state = CircuitState::Open;
            inner.success_count = 0;
            inner.next_attempt = Some(Instant::now() + self.timeout);
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                timeout_ms = self.timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::sleep;

    fn tripped(timeout: Duration) -> CircuitBreaker {
        let breaker = CircuitBreaker::new("test", 5, timeout);
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new("test", 5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
            assert!(breaker.allow());
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("test", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let breaker = tripped(Duration::from_millis(30));
        assert!(!breaker.allow());

        sleep(Duration::from_millis(40));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Probes keep flowing while half-open
        assert!(breaker.allow());
    }

    #[test]
    fn test_three_successes_close() {
        let breaker = tripped(Duration::from_millis(10));
        sleep(Duration::from_millis(20));
        assert!(breaker.allow());

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timeout() {
        let breaker = tripped(Duration::from_millis(30));
        sleep(Duration::from_millis(40));
        assert!(breaker.allow());

        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());

        // Partial successes were discarded: after the new timeout it takes
        // three fresh successes to close.
        sleep(Duration::from_millis(40));
        assert!(breaker.allow());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_concurrent_callers() {
        let breaker = Arc::new(CircuitBreaker::new("test", 500, Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        breaker.allow();
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
