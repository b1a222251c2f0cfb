//! # Tether Core
//!
//! Resilience primitives and the managed connection built on them:
//!
//! - **backoff / retry**: exponential backoff and the retry executor
//! - **circuit_breaker**: three-state breaker guarding a peer or provider
//! - **connection**: the managed connection state machine (client and server roles)
//! - **websocket / memory**: transport implementations

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod connection;
pub mod connection_state;
pub mod health;
pub mod memory;
pub mod queue;
pub mod retry;
pub mod websocket;

// Re-export main types
pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{CircuitBreaker, CircuitState, HALF_OPEN_SUCCESSES};
pub use config::ConnectionConfig;
pub use connection::{ConnectionEvent, ManagedConnection, Role, SendOutcome};
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
pub use health::HealthMonitor;
pub use queue::{FlushReport, QueuedMessage, RetryQueue};
pub use retry::{RetryExecutor, RetryPolicy};
pub use websocket::{ClientWsTransport, ServerWsTransport, WsConnector, WsTransport};
