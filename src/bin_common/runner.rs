//! Service runner for the relay binaries
//!
//! Wraps a long-running service with start and stop banners and a periodic
//! heartbeat line summarizing the connection registry.

use relay::ShutdownManager;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tether::{ConnectionRegistry, Transport};
use tokio::task::JoinHandle;
use tracing::info;

/// Configuration for running a service binary
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Name shown in the banners
    pub name: String,
    /// Time between heartbeat lines
    pub heartbeat: Duration,
}

impl RunConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            heartbeat: Duration::from_secs(300),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

/// Registry snapshot logged by the heartbeat and on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub total: usize,
    pub connected: usize,
}

impl ConnectionSummary {
    pub fn of<T: Transport>(registry: &ConnectionRegistry<T>) -> Self {
        Self {
            total: registry.count(),
            connected: registry.connected_count(),
        }
    }
}

impl fmt::Display for ConnectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} connections ({} connected)", self.total, self.connected)
    }
}

/// Runs a service that accepts connections into `registry`
pub struct ServiceRunner<T: Transport> {
    config: RunConfig,
    registry: Arc<ConnectionRegistry<T>>,
    shutdown: ShutdownManager,
}

impl<T: Transport> ServiceRunner<T> {
    pub fn new(config: RunConfig, registry: Arc<ConnectionRegistry<T>>, shutdown: ShutdownManager) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary::of(&self.registry)
    }

    fn print_banner(&self) {
        info!("");
        info!("========================================");
        info!("Starting {}", self.config.name);
        info!("Heartbeat every {}s", self.config.heartbeat.as_secs());
        info!("Press Ctrl+C to stop");
        info!("========================================");
        info!("");
    }

    fn print_shutdown(&self) {
        info!("");
        info!("========================================");
        info!("{} stopped gracefully", self.config.name);
        info!("Open at shutdown: {}", self.summary());
        info!("========================================");
    }

    /// Log a registry summary every heartbeat until shutdown
    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let interval = self.config.heartbeat;

        tokio::spawn(async move {
            loop {
                shutdown.interruptible_sleep(interval).await;
                if !shutdown.is_running() {
                    break;
                }
                info!("Heartbeat: {}", ConnectionSummary::of(&registry));
            }
        })
    }

    /// Drive `service` to completion between the banners
    pub async fn run<F>(&self, service: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        self.print_banner();
        let heartbeat = self.spawn_heartbeat();
        let result = service.await;
        heartbeat.abort();
        self.print_shutdown();
        result
    }
}
