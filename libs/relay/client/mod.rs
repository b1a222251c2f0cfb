//! Chat client for the relay server
//!
//! A client-role `ManagedConnection` that reconnects on its own, keeps the
//! conversation history, and turns connection events into status lines.

use crate::infrastructure::config::ChatClientConfig;
use crate::protocol::{
    ChatRequest, ClientEnvelope, FilePayload, HistoryMessage, MessageResponse, ResponseStatus,
    ServerEnvelope,
};
use std::sync::Arc;
use std::time::Duration;
use tether::{
    ClientWsTransport, ConnectionConfig, ConnectionEvent, ConnectionState, JsonFieldGuard, ManagedConnection,
    SendOutcome, TetherError, Transport, WsConnector,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] TetherError),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Inbound stream already taken")]
    InboundTaken,
}

/// Status line for a connection event, or `None` for events not shown
pub fn status_line(event: &ConnectionEvent) -> Option<String> {
    match event {
        ConnectionEvent::Connected => Some("Connected".to_string()),
        ConnectionEvent::Disconnected { reason } => Some(format!("Connection lost: {}", reason)),
        ConnectionEvent::Reconnecting { attempt, delay } => Some(format!(
            "Reconnecting (attempt {}) in {:.1}s...",
            attempt,
            delay.as_secs_f64()
        )),
        ConnectionEvent::Failed { attempts } => Some(format!(
            "Connection failed after {} attempts. Reload required.",
            attempts
        )),
        ConnectionEvent::Closed => Some("Disconnected".to_string()),
        ConnectionEvent::Error(_) => None,
    }
}

pub struct ChatClient<T: Transport> {
    connection: ManagedConnection<T>,
    inbound: mpsc::UnboundedReceiver<String>,
    provider: String,
    model: String,
    history: Vec<HistoryMessage>,
}

impl ChatClient<ClientWsTransport> {
    /// Client dialing `config.url` over WebSocket
    pub fn websocket(config: &ChatClientConfig, connection_config: ConnectionConfig) -> Result<Self, ClientError> {
        let connector = Arc::new(WsConnector::new(config.url.clone()));
        let connection = ManagedConnection::<ClientWsTransport>::client("chat", connector, connection_config);
        Self::new(connection, config.provider.clone(), config.model.clone())
    }
}

impl<T: Transport> ChatClient<T> {
    /// Wrap a client-role connection
    ///
    /// Chat requests without a provider are refused instead of queued.
    pub fn new(
        connection: ManagedConnection<T>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let connection = connection.with_guard(Arc::new(JsonFieldGuard::new("type", "message", "provider")));
        let inbound = connection.take_inbound().ok_or(ClientError::InboundTaken)?;

        Ok(Self {
            connection,
            inbound,
            provider: provider.into(),
            model: model.into(),
            history: Vec::new(),
        })
    }

    pub fn connection(&self) -> &ManagedConnection<T> {
        &self.connection
    }

    pub fn history(&self) -> &[HistoryMessage] {
        &self.history
    }

    pub fn set_provider(&mut self, provider: impl Into<String>) {
        self.provider = provider.into();
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection.connect().await?;
        Ok(())
    }

    /// Submit a prompt with the current history
    ///
    /// Queued while the connection is down and replayed on reconnect.
    pub async fn ask(&mut self, prompt: &str, files: Vec<FilePayload>) -> Result<SendOutcome, ClientError> {
        let request = ClientEnvelope::Message(ChatRequest {
            provider: self.provider.clone(),
            model: self.model.clone(),
            prompt: prompt.to_string(),
            history: self.history.clone(),
            files,
        });

        let outcome = self.connection.send(request.to_json()?).await?;
        self.history.push(HistoryMessage::new("user", prompt));
        debug!(?outcome, "Chat request submitted");
        Ok(outcome)
    }

    /// Next envelope from the server
    ///
    /// Completed answers are appended to the history and pongs count as
    /// proof of life for the health check. Unparseable frames are skipped.
    pub async fn recv(&mut self) -> Option<ServerEnvelope> {
        loop {
            let text = self.inbound.recv().await?;
            match serde_json::from_str::<ServerEnvelope>(&text) {
                Ok(envelope) => {
                    match &envelope {
                        ServerEnvelope::Message(MessageResponse {
                            status: ResponseStatus::Completed,
                            response,
                            ..
                        }) => self.history.push(HistoryMessage::new("assistant", response.as_str())),
                        ServerEnvelope::Pong { .. } => self.connection.record_pong(),
                        _ => {}
                    }
                    return Some(envelope);
                }
                Err(e) => warn!(error = %e, "Ignoring unparseable server frame"),
            }
        }
    }

    /// Send `{"type":"ping"}` every `interval` while connected
    pub fn spawn_keepalive(&self, interval: Duration) -> JoinHandle<()> {
        let connection = self.connection.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if connection.state() == ConnectionState::Closed {
                    break;
                }
                if !connection.is_connected() {
                    continue;
                }
                if let Ok(ping) = ClientEnvelope::Ping.to_json() {
                    let _ = connection.send(ping).await;
                }
            }
        })
    }

    pub fn close(&self) -> bool {
        self.connection.close()
    }
}
