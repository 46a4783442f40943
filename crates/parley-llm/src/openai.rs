use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::provider::LlmProvider;
use crate::types::{ChatMessage, ChatRequest, StreamChunk, StreamEvent, ToolCall, Usage};

const SSE_DATA_PREFIX: &str = "data: ";
const STREAM_DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
    chat_path: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self::with_path("openai", api_key, base_url, "/v1/chat/completions".to_string())
    }

    pub fn with_path(name: impl Into<String>, api_key: String, base_url: String, chat_path: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
        }
    }

    /// Like [`Self::new`] but reuses an existing `reqwest::Client` so
    /// per-user providers still share one connection pool.
    pub fn with_client(client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            provider_name: "openai".to_string(),
            api_key,
            base_url,
            chat_path: "/v1/chat/completions".to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn chat(&self, req: &ChatRequest) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
        let body = build_request_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, "sending streaming chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            return Err(LlmError::Auth);
        }
        if status == 404 {
            return Err(LlmError::ModelNotFound);
        }
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(LlmError::Api { status, message: text });
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(process_stream(resp, tx));
        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/v1/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            return Err(LlmError::Auth);
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message: text });
        }

        let body: ModelListResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Api { status, message: e.to_string() })?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

#[derive(Deserialize)]
struct ModelListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize)]
struct ModelListEntry {
    id: String,
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];
    for m in &req.messages {
        messages.push(serde_json::to_value(message_for_wire(m)).unwrap_or_default());
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "temperature": req.temperature,
        "stream": true,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// `ChatMessage` is serialised as-is except assistant tool-call messages,
/// whose `tool_calls` need the OpenAI `{id, type, function}` wire shape.
fn message_for_wire(m: &ChatMessage) -> serde_json::Value {
    match &m.tool_calls {
        Some(calls) => {
            let calls: Vec<serde_json::Value> = calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect();
            serde_json::json!({
                "role": m.role,
                "content": if m.content.is_empty() { serde_json::Value::Null } else { serde_json::json!(m.content) },
                "tool_calls": calls,
            })
        }
        None if !m.images.is_empty() => serde_json::json!({
            "role": m.role,
            "content": multipart_content(m),
            "tool_call_id": m.tool_call_id,
        }),
        None => serde_json::json!({
            "role": m.role,
            "content": m.content,
            "tool_call_id": m.tool_call_id,
        }),
    }
}

/// OpenAI vision wire shape: a `content` array mixing one `text` part
/// with an `image_url` part per attached image, the image given as a
/// data URI since Telegram's own file URLs are short-lived and auth-gated.
fn multipart_content(m: &ChatMessage) -> serde_json::Value {
    let mut parts = Vec::new();
    if !m.content.is_empty() {
        parts.push(serde_json::json!({ "type": "text", "text": m.content }));
    }
    for image in &m.images {
        parts.push(serde_json::json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{};base64,{}", image.mime_type, image.data_base64) },
        }));
    }
    serde_json::json!(parts)
}

/// Per-index accumulator for streamed tool-call deltas: fragments of
/// `id`/`name`/`arguments` arrive keyed by an integer index and are
/// concatenated as they arrive.
#[derive(Default, Clone)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut tokens_in: i64 = 0;
    let mut tokens_out: i64 = 0;
    let mut line_buf = String::new();
    let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
        };
        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
                continue;
            };
            if data.trim() == STREAM_DONE_SENTINEL {
                break;
            }

            let delta: ApiStreamChunk = match serde_json::from_str(data) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(usage) = &delta.usage {
                tokens_in = usage.prompt_tokens as i64;
                tokens_out = usage.completion_tokens as i64;
            }

            for choice in &delta.choices {
                let mut content = None;
                let mut reasoning = None;

                if let Some(c) = &choice.delta.content {
                    if !c.is_empty() {
                        content = Some(c.clone());
                    }
                }
                if let Some(r) = choice.delta.reasoning_content.as_ref().or(choice.delta.reasoning.as_ref()) {
                    if !r.is_empty() {
                        reasoning = Some(r.clone());
                    }
                }
                if let Some(deltas) = &choice.delta.tool_calls {
                    for d in deltas {
                        let idx = d.index;
                        if tool_calls.len() <= idx {
                            tool_calls.resize(idx + 1, ToolCallAccumulator::default());
                        }
                        let acc = &mut tool_calls[idx];
                        if let Some(id) = &d.id {
                            acc.id.push_str(id);
                        }
                        if let Some(f) = &d.function {
                            if let Some(name) = &f.name {
                                acc.name.push_str(name);
                            }
                            if let Some(args) = &f.arguments {
                                acc.arguments.push_str(args);
                            }
                        }
                    }
                }

                let finished = choice.finish_reason.is_some();
                if content.is_some() || reasoning.is_some() {
                    let sent = tx
                        .send(StreamEvent::Chunk(StreamChunk {
                            content,
                            reasoning,
                            usage: None,
                            finished: false,
                            tool_calls: Vec::new(),
                        }))
                        .await;
                    if sent.is_err() {
                        return;
                    }
                }
                if finished {
                    let final_calls = tool_calls
                        .drain(..)
                        .filter(|a| !a.name.is_empty())
                        .map(|a| ToolCall {
                            id: a.id,
                            name: a.name,
                            arguments: a.arguments,
                        })
                        .collect();
                    let _ = tx
                        .send(StreamEvent::Chunk(StreamChunk {
                            content: None,
                            reasoning: None,
                            usage: Some(Usage {
                                prompt_tokens: tokens_in,
                                completion_tokens: tokens_out,
                                total_tokens: tokens_in + tokens_out,
                            }),
                            finished: true,
                            tool_calls: final_calls,
                        }))
                        .await;
                    return;
                }
            }
        }

        line_buf = remainder;
    }
}

#[derive(Deserialize)]
struct ApiStreamChunk {
    choices: Vec<ApiStreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiStreamChoice {
    delta: ApiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ApiStreamDelta {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCallDelta>>,
}

#[derive(Deserialize)]
struct ApiToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<ApiFunctionDelta>,
}

#[derive(Deserialize)]
struct ApiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_accumulator_concatenates_argument_fragments() {
        let mut accs = vec![ToolCallAccumulator::default()];
        accs[0].arguments.push_str("{\"query\":");
        accs[0].arguments.push_str("\"rust\"}");
        assert_eq!(accs[0].arguments, "{\"query\":\"rust\"}");
    }

    #[test]
    fn message_with_images_wires_as_multipart_content() {
        let msg = ChatMessage::user_with_images(
            "what is this?",
            vec![crate::types::ImageAttachment {
                mime_type: "image/jpeg".to_string(),
                data_base64: "Zm9v".to_string(),
            }],
        );
        let wire = message_for_wire(&msg);
        let content = wire["content"].as_array().expect("multipart content array");
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,Zm9v");
    }

    #[test]
    fn build_request_body_includes_tools_only_when_present() {
        let req = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            system: "be helpful".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            temperature: 0.7,
        };
        let body = build_request_body(&req);
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream"], true);
    }
}
