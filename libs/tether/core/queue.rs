//! Retry queue
//!
//! Holds serialized payloads that could not be handed to the transport.
//! Strict FIFO: a message whose resend fails goes back to the front and the
//! flush stops, so later messages never overtake it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub payload: String,
    pub enqueued_at: Instant,
}

impl QueuedMessage {
    pub fn new(payload: String) -> Self {
        Self {
            payload,
            enqueued_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Outcome of one flush pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub stale: usize,
    /// Whether the pass stopped on a failed resend
    pub blocked: bool,
}

#[derive(Debug, Default)]
pub struct RetryQueue {
    items: VecDeque<QueuedMessage>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, message: QueuedMessage) {
        self.items.push_back(message);
    }

    pub fn push_front(&mut self, message: QueuedMessage) {
        self.items.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.items.iter().map(|m| m.payload.clone()).collect()
    }

    /// Hand queued messages to `send` in FIFO order
    ///
    /// Messages older than `ttl` are dropped without being offered. On the
    /// first `Err` the message (returned by `send`) is put back at the front
    /// and the pass ends.
    pub fn flush<F>(&mut self, ttl: Option<Duration>, mut send: F) -> FlushReport
    where
        F: FnMut(QueuedMessage) -> std::result::Result<(), QueuedMessage>,
    {
        let mut report = FlushReport::default();

        while let Some(message) = self.items.pop_front() {
            if ttl.is_some_and(|ttl| message.age() > ttl) {
                report.stale += 1;
                continue;
            }

            match send(message) {
                Ok(()) => report.sent += 1,
                Err(message) => {
                    self.items.push_front(message);
                    report.blocked = true;
                    break;
                }
            }
        }

        report
    }

    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(payloads: &[&str]) -> RetryQueue {
        let mut queue = RetryQueue::new();
        for payload in payloads {
            queue.push_back(QueuedMessage::new(payload.to_string()));
        }
        queue
    }

    #[test]
    fn test_failed_head_keeps_order() {
        let mut queue = queue_of(&["A", "B", "C"]);
        let mut offered = Vec::new();

        let report = queue.flush(None, |msg| {
            offered.push(msg.payload.clone());
            Err(msg)
        });

        assert_eq!(offered, vec!["A"]);
        assert!(report.blocked);
        assert_eq!(queue.payloads(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_failure_midway_reinserts_at_front() {
        let mut queue = queue_of(&["A", "B", "C"]);
        let mut sent = Vec::new();

        let report = queue.flush(None, |msg| {
            if msg.payload == "B" {
                Err(msg)
            } else {
                sent.push(msg.payload);
                Ok(())
            }
        });

        assert_eq!(sent, vec!["A"]);
        assert_eq!(report.sent, 1);
        assert_eq!(queue.payloads(), vec!["B", "C"]);
    }

    #[test]
    fn test_full_flush_in_order() {
        let mut queue = queue_of(&["1", "2", "3"]);
        let mut sent = Vec::new();
        let report = queue.flush(None, |msg| {
            sent.push(msg.payload);
            Ok(())
        });
        assert_eq!(sent, vec!["1", "2", "3"]);
        assert_eq!(report.sent, 3);
        assert!(!report.blocked);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stale_messages_discarded() {
        let mut queue = RetryQueue::new();
        queue.push_back(QueuedMessage {
            payload: "old".into(),
            enqueued_at: Instant::now() - Duration::from_secs(120),
        });
        queue.push_back(QueuedMessage::new("fresh".into()));

        let mut sent = Vec::new();
        let report = queue.flush(Some(Duration::from_secs(60)), |msg| {
            sent.push(msg.payload);
            Ok(())
        });

        assert_eq!(sent, vec!["fresh"]);
        assert_eq!(report.stale, 1);
    }
}
