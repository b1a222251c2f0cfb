//! Process-level plumbing: configuration, logging, shutdown

pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::{ConfigError, RelayConfig};
pub use logging::init_tracing_with_level;
pub use shutdown::ShutdownManager;
