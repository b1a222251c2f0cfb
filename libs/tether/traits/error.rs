use thiserror::Error;

/// Main error type for tether
#[derive(Error, Debug)]
pub enum TetherError {
    /// Transport-level failure (socket error, handshake failure, write error)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Connection closed by the peer or torn down
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The connection was closed intentionally and cannot be reused
    #[error("Connection is closed")]
    Closed,

    /// Circuit breaker rejected the call
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// Payload can never be delivered (missing routing information)
    #[error("Payload rejected: {0}")]
    Rejected(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidState(String),
}

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;
