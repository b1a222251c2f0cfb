//! LLM providers
//!
//! - **client**: the `LlmClient` seam
//! - **openai / claude**: REST mappers over `reqwest`
//! - **catalog**: provider names and token limits
//! - **manager**: provider registry, per-provider breaker, retries

pub mod catalog;
pub mod claude;
pub mod client;
pub mod error;
pub mod manager;
pub mod markdown;
pub mod openai;

pub use claude::ClaudeClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use manager::{ClientFactory, LlmManager};
pub use markdown::detect_markdown;
pub use openai::OpenAiClient;
