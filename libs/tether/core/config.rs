use crate::traits::{Result, TetherError};
use std::time::Duration;

/// Tunables for one managed connection
///
/// Defaults mirror what the browser client and server have always used:
/// ten reconnect attempts backing off 1s → 30s, a ping every 30s and a
/// peer presumed dead after two minutes without a pong.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Reconnect attempts before the client gives up (`Failed`)
    pub max_reconnect_attempts: u32,

    /// Delay before the first reconnect attempt
    pub initial_backoff: Duration,

    /// Upper bound for any reconnect delay
    pub max_backoff: Duration,

    /// Health check period
    pub ping_interval: Duration,

    /// Silence after which the peer is presumed dead
    pub pong_timeout: Duration,

    /// Deadline for a single transport write
    pub write_timeout: Duration,

    /// How long `send` waits for room in the outbound queue before spilling
    /// into the retry queue
    pub send_timeout: Duration,

    /// Capacity of the bounded outbound queue
    pub outbound_capacity: usize,

    /// Consecutive write/health failures that open the connection breaker
    pub breaker_threshold: u32,

    /// How long the connection breaker stays open
    pub breaker_timeout: Duration,

    /// Queued messages older than this are discarded on flush
    pub queued_message_ttl: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(45),
            send_timeout: Duration::from_secs(5),
            outbound_capacity: 256,
            breaker_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            queued_message_ttl: None,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(TetherError::Configuration(
                "initial_backoff must be greater than zero".into(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(TetherError::Configuration(
                "max_backoff must not be smaller than initial_backoff".into(),
            ));
        }
        if self.ping_interval.is_zero() {
            return Err(TetherError::Configuration(
                "ping_interval must be greater than zero".into(),
            ));
        }
        if self.pong_timeout < self.ping_interval {
            return Err(TetherError::Configuration(
                "pong_timeout must be at least one ping_interval".into(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(TetherError::Configuration(
                "outbound_capacity must be greater than zero".into(),
            ));
        }
        if self.breaker_threshold == 0 {
            return Err(TetherError::Configuration(
                "breaker_threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.outbound_capacity, 256);
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let config = ConnectionConfig {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TetherError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_pong_timeout_below_interval() {
        let config = ConnectionConfig {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
