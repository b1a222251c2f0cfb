//! Inbound frame routing
//!
//! # Flow
//! ```text
//! frame ──parse──> ping    ──> pong
//!                  message ──validate──> spawn(process) ──> progress* ──> completed | error
//!                  invalid ──> error
//! ```
//!
//! Every request that fails produces exactly one `status:error` envelope.

use super::envelope::{ChatRequest, ClientEnvelope, ServerEnvelope};
use super::validation::parse_client_frame;
use crate::files::{FileContextBuilder, FileLimits, FileProcessor};
use crate::infrastructure::config::LimitsConfig;
use crate::llm::{detect_markdown, LlmError, LlmManager};
use async_trait::async_trait;
use std::sync::Arc;
use tether::{ManagedConnection, Transport};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Destination for outbound envelopes
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Deliver or queue `envelope`; failures are logged, not returned
    async fn deliver(&self, envelope: ServerEnvelope);
}

#[async_trait]
impl<T: Transport> Outbox for ManagedConnection<T> {
    async fn deliver(&self, envelope: ServerEnvelope) {
        let payload = match envelope.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(connection = %self.id(), error = %e, "Failed to serialize envelope");
                return;
            }
        };

        if let Err(e) = self.send(payload).await {
            debug!(connection = %self.id(), error = %e, "Outbound envelope dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerConfig {
    pub max_files_per_request: usize,
    pub file_limits: FileLimits,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::from_limits(&LimitsConfig::default())
    }
}

impl HandlerConfig {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            max_files_per_request: limits.max_files_per_request,
            file_limits: limits.file_limits(),
        }
    }
}

pub struct ProtocolHandler {
    llm: Arc<LlmManager>,
    files: FileContextBuilder,
    config: HandlerConfig,
}

impl ProtocolHandler {
    pub fn new(llm: Arc<LlmManager>, processor: Arc<dyn FileProcessor>, config: HandlerConfig) -> Self {
        Self {
            llm,
            files: FileContextBuilder::new(processor, config.file_limits),
            config,
        }
    }

    /// Handle one inbound text frame
    ///
    /// Returns the processing task for accepted chat requests. Replies to
    /// pings and validation failures are delivered before returning.
    pub async fn handle_frame(self: &Arc<Self>, text: &str, outbox: Arc<dyn Outbox>) -> Option<JoinHandle<()>> {
        let envelope = match parse_client_frame(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Rejected inbound frame");
                outbox.deliver(ServerEnvelope::error(e.to_string())).await;
                return None;
            }
        };

        match envelope {
            ClientEnvelope::Ping => {
                outbox.deliver(ServerEnvelope::pong()).await;
                None
            }
            ClientEnvelope::Pong => {
                debug!("Pong received");
                None
            }
            ClientEnvelope::Message(request) => {
                if let Err(e) = request.validate(self.config.max_files_per_request) {
                    warn!(provider = %request.provider, error = %e, "Invalid chat request");
                    outbox.deliver(ServerEnvelope::error(e.to_string())).await;
                    return None;
                }

                info!(
                    provider = %request.provider,
                    model = %request.model,
                    files = request.files.len(),
                    history = request.history.len(),
                    "Chat request accepted"
                );

                let handler = Arc::clone(self);
                Some(tokio::spawn(async move {
                    handler.process(request, outbox.as_ref()).await;
                }))
            }
        }
    }

    /// Build the prompt, call the provider and deliver the outcome
    pub async fn process(&self, request: ChatRequest, outbox: &dyn Outbox) {
        let context = match self.files.build(&request.files, outbox).await {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %e, "File processing aborted");
                outbox.deliver(ServerEnvelope::error(e.to_string())).await;
                return;
            }
        };

        let prompt = if context.is_empty() {
            request.prompt.clone()
        } else {
            format!("{}\n\n---\n\n**User question:**\n{}", context, request.prompt)
        };

        let result = self
            .llm
            .complete(&request.provider, &request.model, &prompt, &request.history)
            .await;

        let envelope = match result {
            Ok(response) => {
                let is_markdown = detect_markdown(&response);
                info!(
                    provider = %request.provider,
                    is_markdown,
                    response_length = response.len(),
                    files_processed = request.files.len(),
                    "LLM response processed"
                );
                ServerEnvelope::completed(response, request.provider, is_markdown)
            }
            Err(e @ (LlmError::UnknownProvider { .. } | LlmError::NoProviders)) => {
                ServerEnvelope::error(e.to_string())
            }
            Err(e) => {
                warn!(provider = %request.provider, error = %e, "LLM request failed");
                ServerEnvelope::error(format!("Error processing LLM response: {}", e))
            }
        };

        outbox.deliver(envelope).await;
    }
}
