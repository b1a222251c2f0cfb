//! Peer liveness tracking
//!
//! Timestamps are stored as milliseconds since an internal epoch so the
//! reader task can update them with plain atomic stores while the health
//! task reads them without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct HealthMonitor {
    epoch: Instant,
    last_activity_ms: AtomicU64,
    last_pong_ms: AtomicU64,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            last_pong_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Treat the peer as freshly heard from; called on every (re)connect
    pub fn reset(&self) {
        let now = self.now_ms();
        self.last_activity_ms.store(now, Ordering::Release);
        self.last_pong_ms.store(now, Ordering::Release);
    }

    /// Any inbound frame
    pub fn touch(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Inbound pong frame
    pub fn record_pong(&self) {
        let now = self.now_ms();
        self.last_activity_ms.store(now, Ordering::Release);
        self.last_pong_ms.store(now, Ordering::Release);
    }

    pub fn since_last_pong(&self) -> Duration {
        let pong = self.last_pong_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(pong))
    }

    pub fn since_last_activity(&self) -> Duration {
        let activity = self.last_activity_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(activity))
    }

    /// Whether the peer has been silent (no pong) for longer than `timeout`
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.since_last_pong() > timeout
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_fresh_after_reset() {
        let monitor = HealthMonitor::new();
        monitor.reset();
        assert!(!monitor.is_expired(Duration::from_millis(50)));
    }

    #[test]
    fn test_expires_without_pong() {
        let monitor = HealthMonitor::new();
        monitor.reset();
        sleep(Duration::from_millis(60));
        assert!(monitor.is_expired(Duration::from_millis(50)));
    }

    #[test]
    fn test_activity_does_not_count_as_pong() {
        let monitor = HealthMonitor::new();
        monitor.reset();
        sleep(Duration::from_millis(30));
        monitor.touch();
        assert!(monitor.since_last_activity() < Duration::from_millis(30));
        assert!(monitor.since_last_pong() >= Duration::from_millis(30));
    }

    #[test]
    fn test_pong_refreshes() {
        let monitor = HealthMonitor::new();
        monitor.reset();
        sleep(Duration::from_millis(60));
        monitor.record_pong();
        assert!(!monitor.is_expired(Duration::from_millis(50)));
    }
}
