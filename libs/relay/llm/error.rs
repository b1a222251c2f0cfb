use tether::Retryable;
use thiserror::Error;

/// Errors raised while talking to an LLM provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// Upstream answered with a non-success status
    #[error("API error: status {status} - {body}")]
    Api { status: u16, body: String },

    /// Request (or the per-call deadline) timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure before a response arrived
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// Response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider breaker is open
    #[error("Circuit breaker open for provider {0}")]
    CircuitOpen(String),

    #[error("LLM provider '{provider}' is not supported or not configured. Available providers: [{available}]")]
    UnknownProvider { provider: String, available: String },

    #[error("No LLM provider configured. Check your .env file")]
    NoProviders,
}

impl Retryable for LlmError {
    fn is_temporary(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => *status == 429 || (500..600).contains(status),
            LlmError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e.to_string())
        } else if e.is_decode() {
            LlmError::InvalidResponse(e.to_string())
        } else {
            LlmError::Transport(e.to_string())
        }
    }
}
