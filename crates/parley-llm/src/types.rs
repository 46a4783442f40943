use serde::{Deserialize, Serialize};

/// An inline image attached to a user turn (Telegram photo, or an album
/// part), carried as base64 rather than a fetchable URL since Telegram
/// file links are short-lived and auth-gated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    /// Present only on user messages carrying one or more images (a
    /// photo, or an aggregated media-group turn); wire-serialised as an
    /// OpenAI vision multipart `content` array instead of the plain
    /// string when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            images: Vec::new(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Vec::new(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// A user turn aggregating text with one or more images, for a single
    /// photo message or a whole debounced media-group album.
    pub fn user_with_images(content: impl Into<String>, images: Vec<ImageAttachment>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            images: Vec::new(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: String::new(),
            images: Vec::new(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            images: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A fully-assembled tool call: `arguments` is JSON text, parsed by the
/// tool loop rather than here, since streamed argument fragments are only
/// valid JSON once fully concatenated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: f32,
}

/// One increment of a streamed response. `content`/`reasoning` are deltas,
/// not the accumulated buffer — the caller concatenates them. `tool_calls`
/// is only populated on the final (`finished`) chunk, once every
/// index-keyed fragment has been concatenated.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub usage: Option<Usage>,
    pub finished: bool,
    pub tool_calls: Vec<ToolCall>,
}

/// What arrives on the stream channel: either a chunk, or a stream-level
/// error (connection drop, malformed payload, upstream error envelope).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(StreamChunk),
    Error(String),
}
