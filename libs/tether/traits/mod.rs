//! # Tether Traits
//!
//! Seams of the tether library:
//!
//! - **Transport / Connector**: duplex frame channels and how to (re)establish them
//! - **DeliveryGuard**: which payloads may wait in the retry queue
//! - **Retryable / RetryObserver**: error classification and retry reporting

pub mod error;
pub mod guard;
pub mod observer;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, TetherError};
pub use guard::{AcceptAll, DeliveryGuard, JsonFieldGuard};
pub use observer::{NoOpObserver, RetryObserver, Retryable, TracingObserver};
pub use transport::{
    CloseReason, Connector, Frame, FrameSink, FrameStream, Transport, CLOSE_GOING_AWAY,
    CLOSE_NORMAL, CLOSE_PONG_TIMEOUT,
};
