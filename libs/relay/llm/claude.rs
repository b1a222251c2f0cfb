//! Anthropic messages API client

use super::catalog::{CLAUDE_SONNET_4, CLAUDE_SONNET_4_5, DEFAULT_MAX_TOKENS};
use super::client::{api_error, LlmClient};
use super::error::LlmError;
use crate::protocol::HistoryMessage;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const CLAUDE_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Map a requested model onto a supported one, defaulting to Sonnet 4.5
pub fn resolve_model(requested: &str) -> &'static str {
    match requested {
        CLAUDE_SONNET_4 => CLAUDE_SONNET_4,
        CLAUDE_SONNET_4_5 => CLAUDE_SONNET_4_5,
        other => {
            warn!(requested = %other, "Unsupported Claude model, using Sonnet 4.5");
            CLAUDE_SONNET_4_5
        }
    }
}

/// Anthropic only accepts `user` and `assistant` roles
fn claude_role(role: &str) -> &'static str {
    if role == "assistant" {
        "assistant"
    } else {
        "user"
    }
}

fn build_request<'a>(
    model: &'a str,
    prompt: &'a str,
    history: &'a [HistoryMessage],
    max_tokens: u32,
) -> MessagesRequest<'a> {
    let mut messages: Vec<Message> = history
        .iter()
        .map(|m| Message {
            role: claude_role(&m.role),
            content: &m.content,
        })
        .collect();
    messages.push(Message {
        role: "user",
        content: prompt,
    });

    MessagesRequest {
        model,
        messages,
        max_tokens: if max_tokens == 0 {
            DEFAULT_MAX_TOKENS
        } else {
            max_tokens
        },
    }
}

fn extract_text(response: MessagesResponse) -> Result<String, LlmError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect();

    if text.is_empty() {
        return Err(LlmError::InvalidResponse("empty response from API".to_string()));
    }
    Ok(text)
}

pub struct ClaudeClient {
    api_key: String,
    api_url: String,
    api_version: String,
    model: String,
    client: Client,
}

impl ClaudeClient {
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        api_version: impl Into<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key: api_key.into(),
            api_url: api_url.into(),
            api_version: api_version.into(),
            model: resolve_model(model).to_string(),
            client,
        })
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn send_prompt(
        &self,
        prompt: &str,
        history: &[HistoryMessage],
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let body = build_request(&self.model, prompt, history, max_tokens);

        debug!(model = %self.model, history = history.len(), "POST {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        extract_text(response.json().await?)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model() {
        assert_eq!(resolve_model(CLAUDE_SONNET_4), CLAUDE_SONNET_4);
        assert_eq!(resolve_model("claude-3-opus"), CLAUDE_SONNET_4_5);
        assert_eq!(resolve_model(""), CLAUDE_SONNET_4_5);
    }

    #[test]
    fn test_roles_collapse_to_user() {
        let history = [
            HistoryMessage::new("system", "be nice"),
            HistoryMessage::new("assistant", "ok"),
        ];
        let json = serde_json::to_value(build_request("m", "hi", &history, 0)).unwrap();

        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][2]["content"], "hi");
        assert_eq!(json["max_tokens"], 4096);
    }

    #[test]
    fn test_extract_text() {
        let raw = r#"{"content":[
            {"type":"text","text":"Hello, "},
            {"type":"tool_use","id":"t"},
            {"type":"text","text":"world"}
        ]}"#;
        assert_eq!(extract_text(serde_json::from_str(raw).unwrap()).unwrap(), "Hello, world");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert_eq!(
            extract_text(empty),
            Err(LlmError::InvalidResponse("empty response from API".to_string()))
        );
    }
}
