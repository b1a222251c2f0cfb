//! Transport abstraction
//!
//! A transport is a duplex frame channel that can be split into an
//! independently owned sink (writer task) and stream (reader task).
//!
//! ```text
//! Connector ──connect()──> Transport ──split()──> (FrameSink, FrameStream)
//!                                                     │           │
//!                                               writer task   reader task
//! ```

use super::error::Result;
use async_trait::async_trait;

/// Close code for a normal, intentional closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for an endpoint going away (server shutdown, page unload)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code used when the health check presumes the peer dead
pub const CLOSE_PONG_TIMEOUT: u16 = 4000;

/// A single frame on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseReason>),
}

/// Close code plus human readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A close the peer asked for on purpose
    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

/// Outbound half of a transport
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Send a close frame and release the write half
    async fn close(&mut self, reason: Option<CloseReason>) -> Result<()>;
}

/// Inbound half of a transport
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Read the next frame
    ///
    /// Returns `None` once the peer has gone away.
    async fn next(&mut self) -> Option<Result<Frame>>;
}

/// A duplex frame channel owned by exactly one connection at a time
pub trait Transport: Send + 'static {
    type Sink: FrameSink;
    type Stream: FrameStream;

    /// Whether the transport answers inbound pings by itself
    /// (tungstenite does; the in-memory pair does not)
    const ANSWERS_PINGS: bool = false;

    fn split(self) -> (Self::Sink, Self::Stream);
}

/// Establishes new transports (client side only)
///
/// Called on the initial connect and on every reconnection attempt.
#[async_trait]
pub trait Connector<T: Transport>: Send + Sync + 'static {
    async fn connect(&self) -> Result<T>;

    /// Human readable endpoint for logs
    fn endpoint(&self) -> String;
}
