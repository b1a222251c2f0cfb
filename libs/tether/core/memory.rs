//! In-process transport
//!
//! Two transports wired back to back over unbounded channels. Used by the
//! test suites and by anything that wants to drive a managed connection
//! without a socket.

use crate::traits::{
    CloseReason, Connector, Frame, FrameSink, FrameStream, Result, TetherError, Transport,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub struct MemoryTransport {
    tx: UnboundedSender<Frame>,
    rx: UnboundedReceiver<Frame>,
}

/// Create two connected transports
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, a_rx) = unbounded_channel();
    let (b_tx, b_rx) = unbounded_channel();
    (
        MemoryTransport { tx: a_tx, rx: b_rx },
        MemoryTransport { tx: b_tx, rx: a_rx },
    )
}

pub struct MemorySink {
    tx: Option<UnboundedSender<Frame>>,
}

pub struct MemoryStream {
    rx: UnboundedReceiver<Frame>,
}

impl Transport for MemoryTransport {
    type Sink = MemorySink;
    type Stream = MemoryStream;

    fn split(self) -> (MemorySink, MemoryStream) {
        (MemorySink { tx: Some(self.tx) }, MemoryStream { rx: self.rx })
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| TetherError::ConnectionClosed("sink closed".into()))?;
        tx.send(frame)
            .map_err(|_| TetherError::Transport("peer dropped".into()))
    }

    async fn close(&mut self, reason: Option<CloseReason>) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Frame::Close(reason));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn next(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Connector that hands out memory transports
///
/// Every successful `connect()` yields the far end of a fresh pair to the
/// paired [`MemoryListener`]. Can be switched into a failing mode to
/// exercise the reconnect path.
pub struct MemoryConnector {
    accept_tx: UnboundedSender<MemoryTransport>,
    failing: AtomicBool,
    attempts: AtomicU32,
}

pub struct MemoryListener {
    accept_rx: UnboundedReceiver<MemoryTransport>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, MemoryListener) {
        let (accept_tx, accept_rx) = unbounded_channel();
        let connector = Arc::new(Self {
            accept_tx,
            failing: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        });
        (connector, MemoryListener { accept_rx })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Number of `connect()` calls so far, successful or not
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Connector<MemoryTransport> for MemoryConnector {
    async fn connect(&self) -> Result<MemoryTransport> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.failing.load(Ordering::Acquire) {
            return Err(TetherError::Transport("connection refused".into()));
        }
        let (local, remote) = pair();
        self.accept_tx
            .send(remote)
            .map_err(|_| TetherError::Transport("listener dropped".into()))?;
        Ok(local)
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryTransport> {
        self.accept_rx.recv().await
    }
}
