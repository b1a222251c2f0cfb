//! # Tether
//!
//! Keeps a duplex message channel alive across an unreliable network.
//!
//! ## Features
//!
//! - **One state machine for both ends**: `ManagedConnection` in client role
//!   reconnects with exponential backoff, in server role it reports loss to its owner
//! - **No silent drops**: sends that cannot be delivered wait in a FIFO retry
//!   queue and are replayed in order once the connection recovers
//! - **Dead peer detection**: periodic pings with a pong timeout
//! - **Circuit breaker and retry executor**: reusable around any fallible async call
//! - **Pluggable transports**: tokio-tungstenite WebSockets and an in-memory pair
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether::{ConnectionConfig, ManagedConnection, WsConnector};
//!
//! let connection = ManagedConnection::client(
//!     "chat",
//!     Arc::new(WsConnector::new("ws://localhost:8080/ws")),
//!     ConnectionConfig::default(),
//! );
//! connection.connect().await?;
//! connection.send(r#"{"type":"ping"}"#).await?;
//! ```

pub mod core;
pub mod manager;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use self::core::{
    memory, websocket, AtomicConnectionState, AtomicMetrics, CircuitBreaker, CircuitState,
    ClientWsTransport, ConnectionConfig, ConnectionEvent, ConnectionState, ExponentialBackoff,
    FlushReport, HealthMonitor, ManagedConnection, Metrics, QueuedMessage, RetryExecutor,
    RetryPolicy, RetryQueue, Role, SendOutcome, ServerWsTransport, WsConnector, WsTransport,
    HALF_OPEN_SUCCESSES,
};

// Re-export manager
pub use manager::{ConnectionId, ConnectionRegistry};
