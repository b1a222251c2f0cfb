//! # Relay
//!
//! Routes chat requests from browser clients to LLM providers over
//! resilient WebSocket connections built on `tether`.
//!
//! ## Architecture
//!
//! - **protocol**: JSON envelopes, validation, inbound frame handler
//! - **llm**: provider clients, catalog, manager with breaker and retries
//! - **files**: attachment processing and prompt context rendering
//! - **server**: accept loop and per-connection serving
//! - **client**: chat client with reconnects and status lines
//! - **infrastructure**: configuration, logging, shutdown

pub mod client;
pub mod files;
pub mod infrastructure;
pub mod llm;
pub mod protocol;
pub mod server;

pub use client::{status_line, ChatClient, ClientError};
pub use files::{BasicFileProcessor, FileContextBuilder, FileError, FileProcessor};
pub use infrastructure::{init_tracing_with_level, ConfigError, RelayConfig, ShutdownManager};
pub use llm::{LlmClient, LlmError, LlmManager};
pub use protocol::{
    ChatRequest, ClientEnvelope, HandlerConfig, Outbox, ProtocolHandler, ServerEnvelope,
    ValidationError,
};
pub use server::{serve_connection, RelayServer};
