//! Managed connection state machine
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────── ManagedConnection (Arc<Shared>) ────────────┐
//!  send() ──────────>│ bounded outbound queue ──> writer task ──> FrameSink    │
//!    │  (full/down)  │        ^                                               │
//!    └──> RetryQueue ┼── flush┘            reader task <── FrameStream       │
//!                    │                          │                             │
//!                    │   health task ── Ping ───┘──> inbound channel ─────────┼──> take_inbound()
//!                    └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Each installed transport gets a generation number. Tasks of an older
//! generation that report a lost transport are ignored, so a reconnect can
//! never be torn down by the tasks of the session it replaced.
//!
//! All transitions and retry queue mutations happen under one
//! `parking_lot::Mutex` which is never held across an await.

use super::backoff::ExponentialBackoff;
use super::circuit_breaker::CircuitBreaker;
use super::config::ConnectionConfig;
use super::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
use super::health::HealthMonitor;
use super::queue::{QueuedMessage, RetryQueue};
use crate::traits::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Which end of the wire a connection sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server; never reconnects
    Server,
    /// Owns a connector; reconnects on unexpected loss
    Client,
}

/// What `send` did with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the outbound queue of the live transport
    Sent,
    /// Parked in the retry queue until the connection can take it
    Queued,
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted; a manual `connect()` is required
    Failed { attempts: u32 },
    Closed,
    Error(String),
}

/// Commands for the writer task
#[derive(Debug)]
enum Control {
    Ping,
    Pong(Vec<u8>),
    Close(CloseReason),
}

struct Session {
    out_tx: mpsc::Sender<String>,
    ctl_tx: mpsc::UnboundedSender<Control>,
    reader: JoinHandle<()>,
    health: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Inner {
    attempts: u32,
    generation: u64,
    session: Option<Session>,
    /// Writer of a torn down session that may still be requeueing
    retiring_writer: Option<JoinHandle<()>>,
    queue: RetryQueue,
    reconnect_task: Option<JoinHandle<()>>,
}

struct Shared<T: Transport> {
    id: String,
    role: Role,
    config: ConnectionConfig,
    connector: Option<Arc<dyn Connector<T>>>,
    state: AtomicConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    inner: Mutex<Inner>,
    metrics: AtomicMetrics,
    health: HealthMonitor,
    breaker: CircuitBreaker,
    guard: RwLock<Arc<dyn DeliveryGuard>>,
    event_tx: Sender<ConnectionEvent>,
    event_rx: Receiver<ConnectionEvent>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Resilient duplex connection shared by both ends of the wire
///
/// Cloning is cheap; all clones drive the same connection.
pub struct ManagedConnection<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for ManagedConnection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> ManagedConnection<T> {
    fn build(
        id: String,
        role: Role,
        connector: Option<Arc<dyn Connector<T>>>,
        config: ConnectionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, event_rx) = unbounded();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let breaker = CircuitBreaker::new(
            id.clone(),
            config.breaker_threshold,
            config.breaker_timeout,
        );

        Self {
            shared: Arc::new(Shared {
                id,
                role,
                config,
                connector,
                state: AtomicConnectionState::new(ConnectionState::Disconnected),
                state_tx,
                inner: Mutex::new(Inner {
                    attempts: 0,
                    generation: 0,
                    session: None,
                    retiring_writer: None,
                    queue: RetryQueue::new(),
                    reconnect_task: None,
                }),
                metrics: AtomicMetrics::new(),
                health: HealthMonitor::new(),
                breaker,
                guard: RwLock::new(Arc::new(AcceptAll)),
                event_tx,
                event_rx,
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
            }),
        }
    }

    /// Client-side connection; call [`connect`](Self::connect) to start it
    pub fn client(
        id: impl Into<String>,
        connector: Arc<dyn Connector<T>>,
        config: ConnectionConfig,
    ) -> Self {
        Self::build(id.into(), Role::Client, Some(connector), config)
    }

    /// Server-side connection around an already accepted transport
    ///
    /// Must be called from within a tokio runtime; the connection starts
    /// `Connected` with its tasks running.
    pub fn attach(id: impl Into<String>, transport: T, config: ConnectionConfig) -> Self {
        let connection = Self::build(id.into(), Role::Server, None, config);
        {
            let mut inner = connection.shared.inner.lock();
            Shared::install(&connection.shared, &mut inner, transport);
        }
        connection
    }

    /// Install the delivery guard consulted before queueing
    pub fn with_guard(self, guard: Arc<dyn DeliveryGuard>) -> Self {
        *self.shared.guard.write() = guard;
        self
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    pub fn metrics(&self) -> Metrics {
        self.shared.metrics.snapshot(self.state())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn queued_len(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.inner.lock().attempts
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for_state<F>(&self, predicate: F) -> ConnectionState
    where
        F: Fn(ConnectionState) -> bool,
    {
        let mut rx = self.subscribe_state();
        let current = *rx.borrow_and_update();
        if predicate(current) {
            return current;
        }
        let state = match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // The sender lives as long as `self`
            Err(_) => self.state(),
        };
        state
    }

    /// Time since the peer last answered a ping
    pub fn since_last_pong(&self) -> Duration {
        self.shared.health.since_last_pong()
    }

    /// Record a liveness reply that arrived as an application message
    /// rather than a pong frame
    pub fn record_pong(&self) {
        self.shared.health.record_pong();
        self.shared.breaker.record_success();
    }

    /// Take the inbound text stream
    ///
    /// There is exactly one consumer; later calls return `None`.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.shared.inbound_rx.lock().take()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ConnectionEvent> {
        self.shared.event_rx.try_recv().ok()
    }

    /// Receive an event, waiting up to `timeout` (blocking)
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ConnectionEvent> {
        self.shared.event_rx.recv_timeout(timeout).ok()
    }

    /// Drain all pending events
    pub fn drain_events(&self) -> Vec<ConnectionEvent> {
        self.shared.event_rx.try_iter().collect()
    }

    /// Establish (or re-establish) the transport
    ///
    /// No-op while connecting or connected. A failed attempt enters the
    /// reconnect procedure and the error is returned to the caller. Calling
    /// this from `Failed` starts a fresh attempt budget; calling it during a
    /// backoff cancels the pending reconnect timer.
    pub async fn connect(&self) -> Result<()> {
        self.dial(true).await
    }

    async fn dial(&self, manual: bool) -> Result<()> {
        let shared = &self.shared;
        let connector = match &shared.connector {
            Some(connector) => Arc::clone(connector),
            None => {
                return Err(TetherError::InvalidState(
                    "server connections cannot dial out".into(),
                ))
            }
        };

        let retiring = {
            let mut inner = shared.inner.lock();
            match shared.state.get() {
                ConnectionState::Connecting | ConnectionState::Connected => return Ok(()),
                ConnectionState::Closed => return Err(TetherError::Closed),
                ConnectionState::Failed => {
                    info!(connection = %shared.id, "Manual reconnect after failure");
                    inner.attempts = 0;
                }
                ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
            }
            // The timer path owns this handle and must not abort itself
            if let Some(pending) = inner.reconnect_task.take() {
                if manual {
                    debug!(connection = %shared.id, "Cancelling pending reconnect");
                    pending.abort();
                }
            }
            shared.set_state(ConnectionState::Connecting);
            inner.retiring_writer.take()
        };

        // Let the previous writer put its undelivered payloads back first
        if let Some(writer) = retiring {
            let abort = writer.abort_handle();
            if tokio::time::timeout(shared.config.write_timeout, writer)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        debug!(connection = %shared.id, endpoint = %connector.endpoint(), "Connecting");
        let result = connector.connect().await;

        let mut inner = shared.inner.lock();
        if shared.state.get() != ConnectionState::Connecting {
            // Closed while the connector was running
            return match shared.state.get() {
                ConnectionState::Closed => Err(TetherError::Closed),
                _ => Ok(()),
            };
        }

        match result {
            Ok(transport) => {
                info!(connection = %shared.id, endpoint = %connector.endpoint(), "Connected");
                Shared::install(shared, &mut inner, transport);
                Ok(())
            }
            Err(e) => {
                warn!(connection = %shared.id, error = %e, "Connect attempt failed");
                shared.emit(ConnectionEvent::Error(e.to_string()));
                Shared::schedule_reconnect(shared, &mut inner);
                Err(e)
            }
        }
    }

    /// Send a text payload
    ///
    /// Goes straight to the outbound queue when connected and nothing is
    /// waiting ahead of it; otherwise it is parked in the retry queue and
    /// replayed in order once the connection can take it.
    ///
    /// While connected with the breaker open the call fails fast with
    /// [`TetherError::CircuitOpen`] and the payload is not queued.
    pub async fn send(&self, payload: impl Into<String>) -> Result<SendOutcome> {
        let shared = &self.shared;
        let mut payload = payload.into();

        let fast_path = {
            let inner = shared.inner.lock();
            match shared.state.get() {
                ConnectionState::Closed => return Err(TetherError::Closed),
                ConnectionState::Connected => {
                    if !shared.breaker.allow() {
                        debug!(connection = %shared.id, "Breaker open, refusing send");
                        return Err(TetherError::CircuitOpen);
                    }
                    if inner.queue.is_empty() {
                        inner.session.as_ref().map(|s| s.out_tx.clone())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(out_tx) = fast_path {
            match out_tx.send_timeout(payload, shared.config.send_timeout).await {
                Ok(()) => return Ok(SendOutcome::Sent),
                Err(mpsc::error::SendTimeoutError::Timeout(p)) => {
                    debug!(connection = %shared.id, "Outbound queue full, spilling to retry queue");
                    payload = p;
                }
                Err(mpsc::error::SendTimeoutError::Closed(p)) => payload = p,
            }
        }

        shared.enqueue(payload)
    }

    /// Close with a normal closure code
    pub fn close(&self) -> bool {
        self.close_with(CloseReason::new(CLOSE_NORMAL, "normal closure"))
    }

    /// Close the connection for good
    ///
    /// Idempotent: only the first call transitions to `Closed` and emits
    /// the `Closed` event; later calls return `false`.
    pub fn close_with(&self, reason: CloseReason) -> bool {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if shared.state.get() == ConnectionState::Closed {
            return false;
        }
        Shared::shutdown_locked(shared, &mut inner, Some(reason));
        true
    }
}

impl<T: Transport> Shared<T> {
    fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Start a session on `transport`. Caller holds the lock.
    fn install(this: &Arc<Self>, inner: &mut Inner, transport: T) {
        inner.generation += 1;
        let generation = inner.generation;

        let (sink, stream) = transport.split();
        let (out_tx, out_rx) = mpsc::channel(this.config.outbound_capacity.max(1));
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();

        this.health.reset();
        inner.attempts = 0;
        this.set_state(ConnectionState::Connected);

        let writer = tokio::spawn(writer_task(Arc::clone(this), generation, sink, out_rx, ctl_rx));
        let reader = tokio::spawn(reader_task(Arc::clone(this), generation, stream, ctl_tx.clone()));
        let health = tokio::spawn(health_task(Arc::clone(this), generation, ctl_tx.clone()));

        inner.session = Some(Session {
            out_tx,
            ctl_tx,
            reader,
            health,
            writer,
        });

        this.emit(ConnectionEvent::Connected);
        this.flush_locked(inner);
    }

    /// Stop the session tasks. The writer is left to drain and exit on its own.
    fn teardown(inner: &mut Inner, close: Option<CloseReason>) {
        if let Some(session) = inner.session.take() {
            session.reader.abort();
            session.health.abort();
            if let Some(reason) = close {
                let _ = session.ctl_tx.send(Control::Close(reason));
            }
            inner.retiring_writer = Some(session.writer);
        }
    }

    fn shutdown_locked(this: &Arc<Self>, inner: &mut Inner, close: Option<CloseReason>) {
        this.set_state(ConnectionState::Closed);
        if let Some(task) = inner.reconnect_task.take() {
            task.abort();
        }
        Self::teardown(inner, close);

        let discarded = inner.queue.clear();
        if discarded > 0 {
            warn!(connection = %this.id, discarded, "Discarding queued messages on close");
        }
        info!(connection = %this.id, "Connection closed");
        this.emit(ConnectionEvent::Closed);
    }

    /// Called by the session tasks when the transport is gone
    fn on_transport_lost(this: &Arc<Self>, generation: u64, reason: String, peer_close: Option<CloseReason>) {
        let mut inner = this.inner.lock();
        if inner.generation != generation || this.state.get() != ConnectionState::Connected {
            return;
        }

        if peer_close.as_ref().is_some_and(CloseReason::is_normal) {
            info!(connection = %this.id, "Peer closed the connection");
            Self::shutdown_locked(this, &mut inner, None);
            return;
        }

        warn!(connection = %this.id, reason = %reason, "Transport lost");
        Self::teardown(&mut inner, None);
        this.set_state(ConnectionState::Disconnected);
        this.emit(ConnectionEvent::Disconnected { reason });

        if this.role == Role::Client {
            Self::schedule_reconnect(this, &mut inner);
        }
    }

    fn schedule_reconnect(this: &Arc<Self>, inner: &mut Inner) {
        let max_attempts = this.config.max_reconnect_attempts;
        if inner.attempts >= max_attempts {
            error!(
                connection = %this.id,
                attempts = inner.attempts,
                "Reconnect attempts exhausted"
            );
            this.set_state(ConnectionState::Failed);
            this.emit(ConnectionEvent::Failed {
                attempts: inner.attempts,
            });
            return;
        }

        inner.attempts += 1;
        let attempt = inner.attempts;
        let delay = ExponentialBackoff::new(this.config.initial_backoff, this.config.max_backoff)
            .delay(attempt);

        this.set_state(ConnectionState::Reconnecting);
        this.metrics.inc_reconnect();
        this.emit(ConnectionEvent::Reconnecting { attempt, delay });
        info!(
            connection = %this.id,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        let connection = ManagedConnection {
            shared: Arc::clone(this),
        };
        inner.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = connection.dial(false).await {
                debug!(connection = %connection.id(), error = %e, "Reconnect attempt failed");
            }
        }));
    }

    fn enqueue(&self, payload: String) -> Result<SendOutcome> {
        if let Err(reason) = self.guard.read().check(&payload) {
            self.metrics.inc_dropped();
            warn!(connection = %self.id, reason = %reason, "Rejecting undeliverable payload");
            return Err(TetherError::Rejected(reason));
        }

        let mut inner = self.inner.lock();
        if self.state.get() == ConnectionState::Closed {
            return Err(TetherError::Closed);
        }

        inner.queue.push_back(QueuedMessage::new(payload));
        self.metrics.inc_queued();
        debug!(connection = %self.id, queued = inner.queue.len(), "Message queued");

        if self.state.get() == ConnectionState::Connected {
            self.flush_locked(&mut inner);
        }
        Ok(SendOutcome::Queued)
    }

    /// Put undelivered payloads back ahead of everything already queued
    fn requeue_front(&self, payloads: Vec<String>) {
        let mut inner = self.inner.lock();
        if self.state.get() == ConnectionState::Closed {
            for _ in &payloads {
                self.metrics.inc_dropped();
            }
            return;
        }
        let count = payloads.len();
        for payload in payloads.into_iter().rev() {
            inner.queue.push_front(QueuedMessage::new(payload));
        }
        debug!(connection = %self.id, count, "Requeued undelivered messages");
    }

    /// Move retry queue contents into the outbound queue without blocking.
    /// Caller holds the lock.
    fn flush_locked(&self, inner: &mut Inner) {
        if inner.queue.is_empty() {
            return;
        }
        let out_tx = match inner.session.as_ref() {
            Some(session) => session.out_tx.clone(),
            None => return,
        };
        if !self.breaker.allow() {
            debug!(connection = %self.id, "Breaker open, holding retry queue");
            return;
        }

        let report = inner.queue.flush(self.config.queued_message_ttl, |message| {
            let enqueued_at = message.enqueued_at;
            out_tx
                .try_send(message.payload)
                .map_err(|e| QueuedMessage {
                    payload: e.into_inner(),
                    enqueued_at,
                })
        });

        if report.stale > 0 {
            for _ in 0..report.stale {
                self.metrics.inc_dropped();
            }
            warn!(connection = %self.id, stale = report.stale, "Discarded stale queued messages");
        }
        if report.sent > 0 {
            debug!(
                connection = %self.id,
                flushed = report.sent,
                remaining = inner.queue.len(),
                "Flushed retry queue"
            );
        }
    }

    fn flush(&self) {
        let mut inner = self.inner.lock();
        if self.state.get() == ConnectionState::Connected {
            self.flush_locked(&mut inner);
        }
    }
}

async fn write_frame<S: FrameSink>(sink: &mut S, frame: Frame, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TetherError::Timeout("transport write".into())),
    }
}

async fn writer_task<T: Transport>(
    shared: Arc<Shared<T>>,
    generation: u64,
    mut sink: T::Sink,
    mut out_rx: mpsc::Receiver<String>,
    mut ctl_rx: mpsc::UnboundedReceiver<Control>,
) {
    let write_timeout = shared.config.write_timeout;
    let mut unsent = Vec::new();
    let mut failure = None;

    loop {
        tokio::select! {
            biased;

            control = ctl_rx.recv() => match control {
                Some(Control::Ping) => {
                    if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), write_timeout).await {
                        failure = Some(e.to_string());
                        break;
                    }
                }
                Some(Control::Pong(data)) => {
                    if let Err(e) = write_frame(&mut sink, Frame::Pong(data), write_timeout).await {
                        failure = Some(e.to_string());
                        break;
                    }
                }
                Some(Control::Close(reason)) => {
                    debug!(connection = %shared.id, code = reason.code, "Sending close frame");
                    let _ = tokio::time::timeout(write_timeout, sink.close(Some(reason))).await;
                    break;
                }
                None => break,
            },

            payload = out_rx.recv() => match payload {
                Some(payload) => {
                    match write_frame(&mut sink, Frame::Text(payload.clone()), write_timeout).await {
                        Ok(()) => {
                            shared.metrics.inc_sent();
                            shared.breaker.record_success();
                        }
                        Err(e) => {
                            unsent.push(payload);
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                }
                None => break,
            },
        }
    }

    out_rx.close();
    while let Ok(payload) = out_rx.try_recv() {
        unsent.push(payload);
    }
    if !unsent.is_empty() {
        shared.requeue_front(unsent);
    }

    if let Some(reason) = failure {
        shared.breaker.record_failure();
        Shared::on_transport_lost(&shared, generation, format!("write failed: {}", reason), None);
    }
    debug!(connection = %shared.id, generation, "Writer task exiting");
}

async fn reader_task<T: Transport>(
    shared: Arc<Shared<T>>,
    generation: u64,
    mut stream: T::Stream,
    ctl_tx: mpsc::UnboundedSender<Control>,
) {
    let (reason, peer_close) = loop {
        match stream.next().await {
            Some(Ok(Frame::Text(text))) => {
                shared.health.touch();
                shared.metrics.inc_received();
                let _ = shared.inbound_tx.send(text);
            }
            Some(Ok(Frame::Binary(data))) => {
                shared.health.touch();
                shared.metrics.inc_received();
                let _ = shared
                    .inbound_tx
                    .send(String::from_utf8_lossy(&data).into_owned());
            }
            Some(Ok(Frame::Ping(data))) => {
                shared.health.touch();
                if !T::ANSWERS_PINGS {
                    let _ = ctl_tx.send(Control::Pong(data));
                }
            }
            Some(Ok(Frame::Pong(_))) => {
                shared.health.record_pong();
                shared.breaker.record_success();
            }
            Some(Ok(Frame::Close(reason))) => {
                let text = match &reason {
                    Some(r) => format!("peer closed ({}): {}", r.code, r.reason),
                    None => "peer closed".to_string(),
                };
                break (text, reason);
            }
            Some(Err(e)) => break (e.to_string(), None),
            None => break ("stream ended".to_string(), None),
        }
    };

    Shared::on_transport_lost(&shared, generation, reason, peer_close);
}

async fn health_task<T: Transport>(
    shared: Arc<Shared<T>>,
    generation: u64,
    ctl_tx: mpsc::UnboundedSender<Control>,
) {
    let mut ticker = tokio::time::interval(shared.config.ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // Skip the immediate first tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if shared.health.is_expired(shared.config.pong_timeout) {
            warn!(
                connection = %shared.id,
                silent_ms = shared.health.since_last_pong().as_millis() as u64,
                "Pong timeout, presuming peer dead"
            );
            shared.breaker.record_failure();
            let _ = ctl_tx.send(Control::Close(CloseReason::new(
                CLOSE_PONG_TIMEOUT,
                "pong timeout",
            )));
            Shared::on_transport_lost(&shared, generation, "pong timeout".to_string(), None);
            break;
        }

        if ctl_tx.send(Control::Ping).is_err() {
            break;
        }
        shared.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{pair, MemoryConnector, MemoryTransport};

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            max_reconnect_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            ping_interval: Duration::from_millis(50),
            pong_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_millis(200),
            send_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn recv_text(stream: &mut <MemoryTransport as Transport>::Stream) -> String {
        loop {
            match stream.next().await {
                Some(Ok(Frame::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_attach_starts_connected() {
        let (local, _remote) = pair();
        let connection = ManagedConnection::attach("s1", local, fast_config());
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.role(), Role::Server);
        assert_eq!(connection.try_recv_event(), Some(ConnectionEvent::Connected));
        connection.close();
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (local, remote) = pair();
        let connection = ManagedConnection::attach("s1", local, fast_config());
        let (_sink, mut stream) = remote.split();

        let outcome = connection.send("hello").await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(recv_text(&mut stream).await, "hello");
        connection.close();
    }

    #[tokio::test]
    async fn test_inbound_text_is_forwarded() {
        let (local, remote) = pair();
        let connection = ManagedConnection::attach("s1", local, fast_config());
        let mut inbound = connection.take_inbound().unwrap();
        assert!(connection.take_inbound().is_none());

        let (mut sink, _stream) = remote.split();
        sink.send(Frame::Text("from peer".into())).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap(), "from peer");
        connection.close();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (local, _remote) = pair();
        let connection = ManagedConnection::attach("s1", local, fast_config());
        connection.drain_events();

        assert!(connection.close());
        assert!(!connection.close());
        assert!(!connection.close());

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.drain_events(), vec![ConnectionEvent::Closed]);
        assert!(matches!(connection.send("x").await, Err(TetherError::Closed)));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_queued() {
        let (connector, _listener) = MemoryConnector::new();
        let connection = ManagedConnection::<MemoryTransport>::client("c1", connector, fast_config());

        let outcome = connection.send("early").await.unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(connection.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_guard_rejects_without_queueing() {
        let (connector, _listener) = MemoryConnector::new();
        let connection = ManagedConnection::<MemoryTransport>::client("c1", connector, fast_config())
            .with_guard(Arc::new(JsonFieldGuard::new("type", "message", "provider")));

        let result = connection.send(r#"{"type":"message","prompt":"hi"}"#).await;
        assert!(matches!(result, Err(TetherError::Rejected(_))));
        assert_eq!(connection.queued_len(), 0);
        assert_eq!(connection.metrics().messages_dropped, 1);
    }

    #[tokio::test]
    async fn test_queue_flushed_on_connect() {
        let (connector, mut listener) = MemoryConnector::new();
        let connection = ManagedConnection::<MemoryTransport>::client("c1", connector, fast_config());

        connection.send("one").await.unwrap();
        connection.send("two").await.unwrap();
        connection.connect().await.unwrap();

        let remote = listener.accept().await.unwrap();
        let (_sink, mut stream) = remote.split();
        assert_eq!(recv_text(&mut stream).await, "one");
        assert_eq!(recv_text(&mut stream).await, "two");
        assert_eq!(connection.queued_len(), 0);
        connection.close();
    }

    #[tokio::test]
    async fn test_server_stays_disconnected_on_loss() {
        let (local, remote) = pair();
        let connection = ManagedConnection::attach("s1", local, fast_config());
        drop(remote);

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            connection.wait_for_state(|s| s != ConnectionState::Connected),
        )
        .await
        .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(connection.connect().await, Err(TetherError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_peer_normal_close_is_final() {
        let (connector, mut listener) = MemoryConnector::new();
        let connection = ManagedConnection::<MemoryTransport>::client("c1", connector.clone(), fast_config());
        connection.connect().await.unwrap();

        let remote = listener.accept().await.unwrap();
        let (mut sink, _stream) = remote.split();
        sink.close(Some(CloseReason::new(CLOSE_NORMAL, "bye"))).await.unwrap();

        let state = tokio::time::timeout(
            Duration::from_secs(1),
            connection.wait_for_state(|s| s == ConnectionState::Closed),
        )
        .await
        .unwrap();
        assert_eq!(state, ConnectionState::Closed);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_application_pong_keeps_connection_alive() {
        let config = ConnectionConfig {
            ping_interval: Duration::from_millis(20),
            pong_timeout: Duration::from_millis(100),
            ..fast_config()
        };
        // The remote end never answers ping frames
        let (local, _remote) = pair();
        let connection = ManagedConnection::attach("s1", local, config);

        for _ in 0..15 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            connection.record_pong();
        }
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert!(connection.since_last_pong() < Duration::from_millis(100));

        // Silence from here on trips the health check
        let state = tokio::time::timeout(
            Duration::from_secs(1),
            connection.wait_for_state(|s| s != ConnectionState::Connected),
        )
        .await
        .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }
}
