//! Wire envelopes exchanged between the chat client and the relay server
//!
//! Every frame is a JSON object discriminated by its `type` field.

use serde::{Deserialize, Serialize};

/// Envelopes sent by the chat client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEnvelope {
    Ping,
    Pong,
    Message(ChatRequest),
}

/// A chat turn submitted for completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub history: Vec<HistoryMessage>,
    pub files: Vec<FilePayload>,
}

/// One previous turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl HistoryMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A file attached to a chat request
///
/// `content` is either raw text or base64, depending on `is_base64`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilePayload {
    pub name: String,
    pub content: String,
    pub content_type: String,
    pub file_type: String,
    pub size: u64,
    pub is_base64: bool,
}

/// Envelopes sent by the relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEnvelope {
    Pong { status: String },
    Message(MessageResponse),
    Progress(ProgressUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Completed,
    Error,
}

/// Final outcome of a chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub status: ResponseStatus,
    pub response: String,
    #[serde(rename = "isMarkdown", default, skip_serializing_if = "Option::is_none")]
    pub is_markdown: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// File ingestion progress, emitted before the final response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: String,
    pub message: String,
    pub current: usize,
    pub total: usize,
    pub percentage: u32,
}

impl ServerEnvelope {
    pub fn pong() -> Self {
        ServerEnvelope::Pong {
            status: "ok".to_string(),
        }
    }

    pub fn completed(response: impl Into<String>, provider: impl Into<String>, is_markdown: bool) -> Self {
        ServerEnvelope::Message(MessageResponse {
            status: ResponseStatus::Completed,
            response: response.into(),
            is_markdown: Some(is_markdown),
            provider: Some(provider.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEnvelope::Message(MessageResponse {
            status: ResponseStatus::Error,
            response: message.into(),
            is_markdown: None,
            provider: None,
        })
    }

    /// Progress update; `percentage` is derived from `current / total`
    pub fn progress(message: impl Into<String>, current: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            (current * 100 / total) as u32
        };
        ServerEnvelope::Progress(ProgressUpdate {
            status: "processing".to_string(),
            message: message.into(),
            current,
            total,
            percentage,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ServerEnvelope::Message(MessageResponse {
                status: ResponseStatus::Error,
                ..
            })
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ClientEnvelope {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
