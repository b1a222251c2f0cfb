//! WebSocket relay server
//!
//! Accepts browser connections, wraps each in a server-role
//! `ManagedConnection` and feeds its frames to the protocol handler.

use crate::infrastructure::{RelayConfig, ShutdownManager};
use crate::protocol::{Outbox, ProtocolHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use tether::{websocket, ConnectionConfig, ConnectionRegistry, ConnectionState, ManagedConnection, ServerWsTransport, Transport};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct RelayServer {
    handler: Arc<ProtocolHandler>,
    registry: Arc<ConnectionRegistry<ServerWsTransport>>,
    connection_config: ConnectionConfig,
    max_frame_size: usize,
    bind_address: String,
    shutdown: ShutdownManager,
}

impl RelayServer {
    pub fn new(config: &RelayConfig, handler: Arc<ProtocolHandler>, shutdown: ShutdownManager) -> Self {
        Self {
            handler,
            registry: Arc::new(ConnectionRegistry::new()),
            connection_config: config.connection.to_connection_config(),
            max_frame_size: config.server.max_frame_size,
            bind_address: config.server.bind_address(),
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<ServerWsTransport>> {
        &self.registry
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.bind_address).await
    }

    /// Accept connections until shutdown, then close every connection
    pub async fn run(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "Relay server listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                _ = self.shutdown.wait() => break,
            }
        }

        info!(
            connections = self.registry.count(),
            "Relay server stopping"
        );
        self.registry.shutdown();
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let handler = Arc::clone(&self.handler);
        let registry = Arc::clone(&self.registry);
        let config = self.connection_config.clone();
        let max_frame_size = self.max_frame_size;

        tokio::spawn(async move {
            let transport = match websocket::accept(stream, max_frame_size).await {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(%peer, error = %e, "WebSocket handshake failed");
                    return;
                }
            };

            let connection = ManagedConnection::attach(registry.next_id(), transport, config);
            if let Err(e) = registry.add(connection.clone()) {
                warn!(%peer, error = %e, "Could not register connection");
                connection.close();
                return;
            }

            info!(connection = %connection.id(), %peer, "Client connected");
            serve_connection(connection, handler, registry).await;
        });
    }
}

/// Feed one connection's frames to the handler until it leaves `Connected`
///
/// Frames are handled in receipt order. The connection is removed from
/// the registry (and closed) on exit.
pub async fn serve_connection<T: Transport>(
    connection: ManagedConnection<T>,
    handler: Arc<ProtocolHandler>,
    registry: Arc<ConnectionRegistry<T>>,
) {
    let id = connection.id().to_string();
    let Some(mut inbound) = connection.take_inbound() else {
        warn!(connection = %id, "Inbound stream already taken");
        return;
    };
    let mut states = connection.subscribe_state();
    let outbox: Arc<dyn Outbox> = Arc::new(connection.clone());

    if connection.is_connected() {
        loop {
            tokio::select! {
                biased;
                Some(text) = inbound.recv() => {
                    debug!(connection = %id, bytes = text.len(), "Frame received");
                    handler.handle_frame(&text, Arc::clone(&outbox)).await;
                }
                changed = states.changed() => {
                    if changed.is_err() || *states.borrow() != ConnectionState::Connected {
                        break;
                    }
                }
            }
        }
    }

    info!(connection = %id, state = %connection.state(), "Client disconnected");
    registry.remove(&id);
}
