use super::envelope::{ChatRequest, ClientEnvelope};
use thiserror::Error;

/// Reasons an inbound frame is refused before any processing starts
///
/// The `Display` text is sent verbatim to the client as a `status:error`
/// response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("LLM provider not specified. Select a provider and try again.")]
    MissingProvider,

    #[error("Empty message. Type something or attach files.")]
    EmptyMessage,

    #[error("Maximum number of files exceeded. Limit: {limit}")]
    TooManyFiles { limit: usize },
}

/// Parse one inbound text frame
pub fn parse_client_frame(text: &str) -> Result<ClientEnvelope, ValidationError> {
    serde_json::from_str(text).map_err(|e| ValidationError::InvalidPayload(e.to_string()))
}

impl ChatRequest {
    /// Check the request can be processed
    ///
    /// Checks run in order: provider, content, file count.
    pub fn validate(&self, max_files: usize) -> Result<(), ValidationError> {
        if self.provider.trim().is_empty() {
            return Err(ValidationError::MissingProvider);
        }

        if self.prompt.trim().is_empty() && self.files.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        if self.files.len() > max_files {
            return Err(ValidationError::TooManyFiles { limit: max_files });
        }

        Ok(())
    }
}
