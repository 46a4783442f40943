use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parley_core::config::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use parley_core::{ParleyError, Role, SessionId, UserId};
use parley_llm::{ChatMessage, ChatRequest, ImageAttachment, LlmError, LlmFactory, StreamEvent, Usage};
use parley_services::Services;
use parley_tools::ToolRegistry;
use tracing::{instrument, warn};

use crate::error::{PipelineError, Result};
use crate::thinking::{strip_for_persistence, ThinkingFilter};

/// A turn is capped at `MAX_TOOL_ROUNDS + 1` LLM invocations: up to three
/// rounds of tool calls, then one final reply.
const MAX_TOOL_ROUNDS: u32 = 3;
const MAX_LLM_CALLS: u32 = MAX_TOOL_ROUNDS + 1;

/// How often the placeholder message is edited while the reply streams in.
pub const STREAM_UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

/// How long a single tool call may run before it is treated as failed.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Identity of the persona/session pinned at turn start. Captured once
/// and threaded through every subsequent read/write so a concurrent
/// `/persona` or `/chat` switch never retargets a turn already underway.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub user_id: UserId,
    pub persona_name: String,
    pub session_id: SessionId,
}

/// One piece of visible progress the caller should relay to the user —
/// editing a placeholder message, replacing it with chunked output, or
/// delivering a synthesized voice clip. Decouples the pipeline from any
/// particular channel's message-sending API.
pub enum TurnUpdate {
    /// Replace the placeholder's text in place.
    Edit(String),
    /// Final text exceeded the single-message limit: delete the
    /// placeholder and send these chunks instead.
    Chunks(Vec<String>),
    /// A synthesized voice clip ready to deliver.
    Voice(parley_tools::VoiceClip),
}

pub struct ChatPipeline {
    services: Arc<Services>,
    llm_factory: Arc<dyn LlmFactory>,
    tools: Arc<ToolRegistry>,
    /// Held separately from the generic registry because draining its
    /// per-user pending queue needs the concrete type, not just the
    /// `Tool` trait object every registry member is erased to.
    tts: Option<Arc<parley_tools::TtsTool>>,
}

impl ChatPipeline {
    pub fn new(
        services: Arc<Services>,
        llm_factory: Arc<dyn LlmFactory>,
        tools: Arc<ToolRegistry>,
        tts: Option<Arc<parley_tools::TtsTool>>,
    ) -> Self {
        Self { services, llm_factory, tools, tts }
    }

    /// Resolves and pins the persona/session for a turn. Call once per
    /// turn, before any reads or writes, and pass the result to every
    /// subsequent method so the pin holds even if the user's "current"
    /// pointer moves mid-flight.
    pub fn pin_context(&self, user_id: UserId) -> TurnContext {
        let settings = self.services.get_user_settings(user_id);
        let session = self.services.current_session(user_id, &settings.current_persona);
        TurnContext {
            user_id,
            persona_name: settings.current_persona,
            session_id: session.id,
        }
    }

    /// Preflight checks, in order: API key present, then token budget.
    pub fn preflight(&self, user_id: UserId) -> Result<()> {
        let settings = self.services.get_user_settings(user_id);
        if settings.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(PipelineError::Core(ParleyError::ConfigMissing(
                "no API key configured".to_string(),
            )));
        }
        match self.services.get_remaining_tokens(user_id) {
            Some(remaining) if remaining <= 0 => {
                Err(PipelineError::Core(ParleyError::QuotaExceeded))
            }
            _ => Ok(()),
        }
    }

    fn enabled_tools(&self, settings: &parley_cache::UserSettings) -> HashSet<String> {
        settings.enabled_tools.iter().cloned().collect()
    }

    async fn build_system_prompt(&self, ctx: &TurnContext, persona_prompt: &str, user_text: &str) -> String {
        let settings = self.services.get_user_settings(ctx.user_id);
        let enabled = self.enabled_tools(&settings);
        let enriched = self
            .tools
            .enrich_system_prompt(ctx.user_id, &enabled, persona_prompt.to_string(), Some(user_text))
            .await;
        let instructions = self.tools.instructions(&enabled);
        if instructions.is_empty() {
            enriched
        } else {
            format!("{enriched}\n\n{instructions}")
        }
    }

    /// Runs one full turn: assembles the prompt, drives the bounded
    /// streaming tool-call loop, filters thinking tags, persists the
    /// exchange, and drains any voice clips queued during the turn.
    /// `on_update` is invoked for every placeholder edit and the final
    /// delivery event; the caller maps these onto its channel's API.
    /// `images` carries a photo or a whole debounced media-group album
    /// aggregated into this one turn; pass an empty slice for plain text.
    #[instrument(skip(self, on_update, persona_prompt, images))]
    pub async fn run_turn<F, Fut>(
        &self,
        ctx: &TurnContext,
        persona_prompt: &str,
        user_text: &str,
        images: &[ImageAttachment],
        mut on_update: F,
    ) -> Result<()>
    where
        F: FnMut(TurnUpdate) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let persisted_text = persisted_text_for_turn(user_text, images);
        self.services.add_user_message_to_session(ctx.session_id, &persisted_text);

        let system_prompt = self.build_system_prompt(ctx, persona_prompt, user_text).await;
        let settings = self.services.get_user_settings(ctx.user_id);
        let enabled = self.enabled_tools(&settings);

        let history = self.services.get_history(ctx.session_id, 50);
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|m| match m.role {
                Role::User => ChatMessage::user(m.content.clone()),
                Role::Assistant => ChatMessage::assistant(m.content.clone()),
            })
            .collect();
        // The user's current turn was just persisted above, so it is
        // already the last element of `history`/`messages`; swap it for
        // the real caption + image parts the LLM should actually see,
        // rather than the "[Image]caption" marker kept for persistence.
        if !images.is_empty() {
            if let Some(last) = messages.last_mut() {
                *last = ChatMessage::user_with_images(user_text, images.to_vec());
            }
        }

        let tool_defs = self.tools.definitions(&enabled);
        let model = settings.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let llm = self.llm_factory.build(
            settings.api_key.as_deref().unwrap_or_default(),
            settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
        );

        let mut visible = String::new();
        let mut last_usage: Option<Usage> = None;
        let mut last_edit = tokio::time::Instant::now() - STREAM_UPDATE_INTERVAL;
        let mut filter = ThinkingFilter::new();
        let mut edited_once = false;
        let mut tools_unsupported = false;
        let mut reasoning_active = false;

        for call_index in 0..MAX_LLM_CALLS {
            let request = ChatRequest {
                model: model.clone(),
                system: system_prompt.clone(),
                messages: messages.clone(),
                tools: if tools_unsupported { vec![] } else { tool_defs.clone() },
                temperature: settings.temperature,
            };

            let mut rx = match llm.chat(&request).await {
                Ok(rx) => rx,
                Err(e) if !tools_unsupported && !tool_defs.is_empty() && LlmError::looks_like_tools_unsupported(&e.to_string()) => {
                    warn!(error = %e, "back end rejected tool schemas, retrying once without tools");
                    tools_unsupported = true;
                    let retry_request = ChatRequest { tools: vec![], ..request };
                    llm.chat(&retry_request).await?
                }
                Err(e) => return Err(e.into()),
            };
            let mut tool_calls = Vec::new();

            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Chunk(chunk) => {
                        if let Some(reasoning) = &chunk.reasoning {
                            if !reasoning.is_empty() {
                                reasoning_active = true;
                            }
                        }
                        if let Some(content) = &chunk.content {
                            visible.push_str(&filter.push(content));
                        }
                        if let Some(usage) = chunk.usage {
                            last_usage = Some(usage);
                        }
                        if !chunk.tool_calls.is_empty() {
                            tool_calls = chunk.tool_calls;
                        }

                        let should_edit = !edited_once
                            || last_edit.elapsed() >= STREAM_UPDATE_INTERVAL;
                        if should_edit {
                            let display = if visible.is_empty() && (filter.is_inside() || reasoning_active) {
                                "Thinking…".to_string()
                            } else {
                                format!("{visible}▌")
                            };
                            on_update(TurnUpdate::Edit(display)).await;
                            last_edit = tokio::time::Instant::now();
                            edited_once = true;
                        }

                        if chunk.finished {
                            break;
                        }
                    }
                    StreamEvent::Error(e) => {
                        warn!(error = %e, "llm stream reported an error");
                    }
                }
            }

            if tool_calls.is_empty() {
                break;
            }
            if call_index + 1 == MAX_LLM_CALLS {
                break;
            }

            messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
            for call in &tool_calls {
                let outcome = match tokio::time::timeout(
                    TOOL_CALL_TIMEOUT,
                    self.tools.dispatch(ctx.user_id, &call.name, &call.arguments),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => parley_tools::ToolOutcome::Text(format!("tool '{}' timed out", call.name)),
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), outcome.into_text()));
            }
        }

        let mut final_text = strip_for_persistence(&visible);
        if final_text.is_empty() {
            final_text = "…".to_string();
        }
        final_text = self.tools.post_process(ctx.user_id, &enabled, final_text).await;

        self.services.add_assistant_message_to_session(ctx.session_id, &final_text);
        if let Some(usage) = last_usage {
            self.services.add_token_usage(
                ctx.user_id,
                &ctx.persona_name,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
        }

        if final_text.len() <= MAX_MESSAGE_LENGTH {
            on_update(TurnUpdate::Edit(crate::delivery::markdown_to_telegram_html(&final_text))).await;
        } else {
            let chunks = crate::delivery::split_chunks_smart(&final_text)
                .into_iter()
                .map(|c| crate::delivery::markdown_to_telegram_html(&c))
                .collect();
            on_update(TurnUpdate::Chunks(chunks)).await;
        }

        if let Some(tts) = &self.tts {
            for clip in tts.drain_pending(ctx.user_id) {
                on_update(TurnUpdate::Voice(clip)).await;
            }
        }

        Ok(())
    }

    /// `/retry`: drop the pinned session's last exchange and rerun the
    /// turn with the same user content.
    pub async fn retry<F, Fut>(
        &self,
        ctx: &TurnContext,
        persona_prompt: &str,
        mut on_update: F,
    ) -> Result<()>
    where
        F: FnMut(TurnUpdate) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let Some(user_text) = self.services.pop_last_exchange(ctx.session_id) else {
            return Ok(());
        };
        self.run_turn(ctx, persona_prompt, &user_text, &[], &mut on_update).await
    }
}

/// History text recorded for a turn carrying attachments: `"[Image]"` with
/// the caption appended directly, no separating space.
fn persisted_text_for_turn(user_text: &str, images: &[ImageAttachment]) -> String {
    if images.is_empty() {
        user_text.to_string()
    } else if user_text.is_empty() {
        "[Image]".to_string()
    } else {
        format!("[Image]{user_text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_llm_calls_is_tool_rounds_plus_one() {
        assert_eq!(MAX_LLM_CALLS, 4);
    }

    #[test]
    fn captioned_image_turn_has_no_space_after_the_marker() {
        let images = vec![ImageAttachment { mime_type: "image/jpeg".to_string(), data_base64: String::new() }];
        assert_eq!(persisted_text_for_turn("describe", &images), "[Image]describe");
        assert_eq!(persisted_text_for_turn("", &images), "[Image]");
        assert_eq!(persisted_text_for_turn("plain text", &[]), "plain text");
    }
}
