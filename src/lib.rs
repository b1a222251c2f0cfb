//! LLM Relay - Main Library
//!
//! Entry crate for the relay binaries.
//!
//! ## Architecture
//!
//! - **bin_common**: Common utilities for binary executables (CLI, service runner)
//! - **relay**: Chat protocol, LLM providers, server and client (re-exported from workspace)
//! - **tether**: Resilient connection library (re-exported from workspace)
//!
//! ## Usage in Binaries
//!
//! ```rust
//! use llm_relay::bin_common::{load_config_from_env, ConfigType};
//! use llm_relay::relay::RelayConfig;
//! ```

// Re-export workspace libraries for convenience
pub use relay;
pub use tether;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;
    pub mod runner;

    pub use cli::{config_path_from_args, load_config_from_env, parse_args, ConfigType};
    pub use runner::{ConnectionSummary, RunConfig, ServiceRunner};
}
