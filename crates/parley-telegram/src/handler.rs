//! Telegram message handler registered in the teloxide `Dispatcher`.
//!
//! Runs for every incoming `Message`:
//! 1. Bot-message filter
//! 2. Allowlist check (deny-by-default)
//! 3. DM guard
//! 4. Group-chat gate (reply-to-bot OR `@handle` mention)
//! 5. Media-group debounce buffering
//! 6. Slash-command interception
//! 7. Non-blocking pipeline turn

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parley_core::UserId;
use parley_llm::ImageAttachment;
use parley_pipeline::{dispatch_slash, SlashOutcome, TurnUpdate};
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::warn;

use crate::allow;
use crate::attach;
use crate::context::AppContext;
use crate::send;
use crate::typing::TypingHandle;

/// One buffered message belonging to an in-flight media group.
pub struct GroupedPart {
    caption: String,
    images: Vec<ImageAttachment>,
}

/// Shared across every invocation of the handler via `dptree::deps!`.
/// Keyed by Telegram's `media_group_id`.
pub type MediaGroupBuffers = Arc<DashMap<String, Vec<GroupedPart>>>;

pub async fn handle_message(
    bot: Bot,
    msg: Message,
    ctx: AppContext,
    config: parley_core::config::TelegramConfig,
    groups: MediaGroupBuffers,
) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let username = from.username.as_deref().unwrap_or("");
    let user_id = UserId(from.id.0 as i64);

    if !allow::is_allowed(&config.allow_users, username, &from.id.0.to_string()) {
        return Ok(());
    }
    if msg.chat.is_private() && !config.dm_allowed {
        return Ok(());
    }

    let is_group = msg.chat.is_group() || msg.chat.is_supergroup();
    let caption_or_text = msg.text().or(msg.caption()).unwrap_or("").to_string();

    if is_group && config.require_mention {
        let bot_info = bot.get_me().await;
        let bot_username = bot_info
            .as_ref()
            .ok()
            .and_then(|me| me.user.username.as_deref())
            .unwrap_or("");
        let replied_to_bot = msg
            .reply_to_message()
            .and_then(|r| r.from.as_ref())
            .map(|u| u.username.as_deref() == Some(bot_username) && !bot_username.is_empty())
            .unwrap_or(false);
        if !replied_to_bot && !contains_mention(&caption_or_text, bot_username) {
            // The mention may land on a later part of the same album, so a
            // grouped message without it yet is still buffered below
            // rather than dropped outright; a lone text message with no
            // mention is dropped here.
            if msg.media_group_id().is_none() {
                return Ok(());
            }
        }
    }

    let media = attach::extract(&bot, &msg, config.max_attachment_bytes).await;

    if let Some(group_id) = msg.media_group_id().map(str::to_string) {
        let is_first = !groups.contains_key(&group_id);
        groups.entry(group_id.clone()).or_default().push(GroupedPart {
            caption: caption_or_text,
            images: media.images,
        });

        if is_first {
            let bot = bot.clone();
            let ctx = ctx.clone();
            let chat_id = msg.chat.id;
            let debounce = Duration::from_millis(config.media_group_debounce_ms);
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                let Some((_, parts)) = groups.remove(&group_id) else {
                    return;
                };
                let text = parts
                    .iter()
                    .map(|p| p.caption.as_str())
                    .find(|c| !c.is_empty())
                    .unwrap_or("")
                    .to_string();
                let images: Vec<ImageAttachment> = parts.into_iter().flat_map(|p| p.images).collect();
                run_turn_spawned(bot, ctx, chat_id, user_id, text, images).await;
            });
        }
        return Ok(());
    }

    let text = caption_or_text;
    let has_media = !media.images.is_empty() || media.file_text.is_some();
    if text.is_empty() && !has_media {
        return Ok(());
    }

    if text.starts_with('/') {
        match dispatch_slash(user_id, &text, &ctx.services, ctx.llm_factory.as_ref(), &ctx.tools).await {
            SlashOutcome::Reply(reply) => {
                send::send_html(&bot, msg.chat.id, &reply).await;
                return Ok(());
            }
            SlashOutcome::Retry => {
                run_retry_spawned(bot, ctx, msg.chat.id, user_id).await;
                return Ok(());
            }
            SlashOutcome::NotACommand => {}
        }
    }

    let full_text = match media.file_text {
        Some(file_text) if text.is_empty() => file_text,
        Some(file_text) => format!("{text}\n\n{file_text}"),
        None => text,
    };

    run_turn_spawned(bot, ctx, msg.chat.id, user_id, full_text, media.images).await;
    Ok(())
}

/// Runs one turn in a detached task: preflight, placeholder, streaming
/// loop, delivery. Never blocks the dispatcher.
async fn run_turn_spawned(
    bot: Bot,
    ctx: AppContext,
    chat_id: ChatId,
    user_id: UserId,
    text: String,
    images: Vec<ImageAttachment>,
) {
    tokio::spawn(async move {
        if let Err(e) = ctx.pipeline.preflight(user_id) {
            let _ = bot.send_message(chat_id, e.user_message()).await;
            return;
        }

        let turn_ctx = ctx.pipeline.pin_context(user_id);
        let persona = ctx.services.switch_persona(user_id, &turn_ctx.persona_name);

        let Some(placeholder) = send::send_html(&bot, chat_id, "…").await else {
            return;
        };

        let typing = TypingHandle::start(bot.clone(), chat_id);
        let bot2 = bot.clone();
        let result = ctx
            .pipeline
            .run_turn(&turn_ctx, &persona.system_prompt, &text, &images, |update| {
                let bot = bot2.clone();
                let chat_id = chat_id;
                let message_id = placeholder.id;
                async move {
                    deliver(&bot, chat_id, message_id, update).await;
                }
            })
            .await;
        typing.stop();

        if let Err(e) = result {
            warn!(error = %e, %user_id, "telegram: turn failed");
            send::edit_html(&bot, chat_id, placeholder.id, &format!("⚠️ {}", e.user_message())).await;
        }
    });
}

async fn run_retry_spawned(bot: Bot, ctx: AppContext, chat_id: ChatId, user_id: UserId) {
    tokio::spawn(async move {
        let turn_ctx = ctx.pipeline.pin_context(user_id);
        let persona = ctx.services.switch_persona(user_id, &turn_ctx.persona_name);

        let Some(placeholder) = send::send_html(&bot, chat_id, "…").await else {
            return;
        };
        let typing = TypingHandle::start(bot.clone(), chat_id);
        let bot2 = bot.clone();
        let result = ctx
            .pipeline
            .retry(&turn_ctx, &persona.system_prompt, |update| {
                let bot = bot2.clone();
                let message_id = placeholder.id;
                async move {
                    deliver(&bot, chat_id, message_id, update).await;
                }
            })
            .await;
        typing.stop();

        if let Err(e) = result {
            warn!(error = %e, %user_id, "telegram: retry failed");
            send::edit_html(&bot, chat_id, placeholder.id, &format!("⚠️ {}", e.user_message())).await;
        }
    });
}

async fn deliver(bot: &Bot, chat_id: ChatId, message_id: teloxide::types::MessageId, update: TurnUpdate) {
    match update {
        TurnUpdate::Edit(html) => send::edit_html(bot, chat_id, message_id, &html).await,
        TurnUpdate::Chunks(chunks) => {
            send::delete_message(bot, chat_id, message_id).await;
            send::send_chunks(bot, chat_id, &chunks).await;
        }
        TurnUpdate::Voice(clip) => {
            let file = InputFile::memory(clip.audio);
            if let Err(e) = bot.send_voice(chat_id, file).await {
                warn!(error = %e, "telegram: voice delivery failed");
            }
        }
    }
}

fn contains_mention(text: &str, bot_username: &str) -> bool {
    if bot_username.is_empty() {
        return false;
    }
    text.contains(&format!("@{bot_username}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_mention_positive() {
        assert!(contains_mention("Hey @mybot, help!", "mybot"));
    }

    #[test]
    fn contains_mention_negative() {
        assert!(!contains_mention("Hello there", "mybot"));
    }

    #[test]
    fn contains_mention_empty_username() {
        assert!(!contains_mention("@foo bar", ""));
    }

    #[test]
    fn grouped_part_keeps_first_nonempty_caption() {
        let parts = vec![
            GroupedPart { caption: String::new(), images: vec![] },
            GroupedPart { caption: "album caption".to_string(), images: vec![] },
        ];
        let text = parts.iter().map(|p| p.caption.as_str()).find(|c| !c.is_empty()).unwrap_or("");
        assert_eq!(text, "album caption");
    }
}
