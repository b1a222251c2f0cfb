use crate::core::{ConnectionState, ManagedConnection, Metrics};
use crate::traits::{CloseReason, Result, TetherError, Transport, CLOSE_GOING_AWAY};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Registry of live connections
///
/// The registry lock only guards the map. Connections are cloned out
/// before any of their methods run, so the registry lock is never held
/// while a connection lock is taken.
pub struct ConnectionRegistry<T: Transport> {
    connections: RwLock<HashMap<ConnectionId, ManagedConnection<T>>>,
    next_id: AtomicU64,
}

impl<T: Transport> ConnectionRegistry<T> {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next `client_<n>` id
    pub fn next_id(&self) -> ConnectionId {
        format!("client_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn add(&self, connection: ManagedConnection<T>) -> Result<()> {
        let id = connection.id().to_string();
        let mut connections = self.connections.write();

        if connections.contains_key(&id) {
            return Err(TetherError::Configuration(format!(
                "Connection with id '{}' already exists",
                id
            )));
        }

        connections.insert(id.clone(), connection);
        info!(connection = %id, total = connections.len(), "Connection registered");
        Ok(())
    }

    /// Remove a connection and close it
    ///
    /// Returns `false` if the id was unknown.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(connection) => {
                connection.close();
                info!(connection = %id, "Connection removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<ManagedConnection<T>> {
        self.connections.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<ConnectionId> {
        self.connections.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    fn snapshot(&self) -> Vec<(ConnectionId, ManagedConnection<T>)> {
        self.connections
            .read()
            .iter()
            .map(|(id, connection)| (id.clone(), connection.clone()))
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|(_, connection)| connection.is_connected())
            .count()
    }

    pub fn statuses(&self) -> HashMap<ConnectionId, ConnectionState> {
        self.snapshot()
            .into_iter()
            .map(|(id, connection)| (id, connection.state()))
            .collect()
    }

    pub fn metrics(&self, id: &str) -> Option<Metrics> {
        self.get(id).map(|connection| connection.metrics())
    }

    /// Send to every connected connection; returns how many accepted it
    pub async fn broadcast(&self, payload: &str) -> usize {
        let mut count = 0;
        for (id, connection) in self.snapshot() {
            if !connection.is_connected() {
                continue;
            }
            match connection.send(payload).await {
                Ok(_) => count += 1,
                Err(e) => warn!(connection = %id, error = %e, "Broadcast send failed"),
            }
        }
        count
    }

    /// Close and forget every connection
    pub fn shutdown(&self) {
        let connections = std::mem::take(&mut *self.connections.write());
        info!(count = connections.len(), "Shutting down connection registry");

        for (id, connection) in connections {
            debug!(connection = %id, "Closing connection");
            connection.close_with(CloseReason::new(CLOSE_GOING_AWAY, "server shutdown"));
        }
    }
}

impl<T: Transport> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
