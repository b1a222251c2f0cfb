use super::error::LlmError;
use crate::protocol::HistoryMessage;
use async_trait::async_trait;

/// A single LLM provider endpoint
///
/// Implementations map one prompt onto the provider's REST API and back.
/// They do not retry; [`super::LlmManager`] owns retries and the breaker.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `prompt` after the prior `history`, returning the completion text
    async fn send_prompt(
        &self,
        prompt: &str,
        history: &[HistoryMessage],
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// Model this client talks to
    fn model(&self) -> &str;
}

/// Read the body of a non-success response into an [`LlmError::Api`]
pub(crate) async fn api_error(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    LlmError::Api { status, body }
}
