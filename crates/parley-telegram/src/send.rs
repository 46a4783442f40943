//! Message sending helpers for the Telegram adapter.
//!
//! `parley-pipeline::delivery` already shapes text into HTML-tagged,
//! chunk-max-sized pieces; this module only has to get them onto the
//! wire, tolerating the handful of benign Telegram API failures — a
//! flood-control `RetryAfter` or an edit that changed nothing.

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::warn;

fn is_swallowable(err: &teloxide::RequestError) -> bool {
    let text = err.to_string().to_ascii_lowercase();
    text.contains("message is not modified") || text.contains("retry after")
}

/// Send `html` as a new message. Falls back to a plain-text send if
/// Telegram rejects the HTML (unbalanced tags slipping past our own
/// conversion). Returns the sent message so the caller can edit it later.
pub async fn send_html(bot: &Bot, chat_id: ChatId, html: &str) -> Option<Message> {
    match bot.send_message(chat_id, html).parse_mode(ParseMode::Html).await {
        Ok(msg) => Some(msg),
        Err(e) if is_swallowable(&e) => None,
        Err(e) => {
            warn!(error = %e, "telegram: html send rejected, falling back to plain text");
            bot.send_message(chat_id, html).await.ok()
        }
    }
}

/// Edit an existing message in place with `html`. Silently does nothing
/// on "message is not modified" or a rate limit; falls back to a plain
/// text edit if the HTML itself is rejected.
pub async fn edit_html(bot: &Bot, chat_id: ChatId, message_id: teloxide::types::MessageId, html: &str) {
    let result = bot
        .edit_message_text(chat_id, message_id, html)
        .parse_mode(ParseMode::Html)
        .await;
    if let Err(e) = result {
        if is_swallowable(&e) {
            return;
        }
        warn!(error = %e, "telegram: html edit rejected, falling back to plain text");
        let _ = bot.edit_message_text(chat_id, message_id, html).await;
    }
}

/// Delete a message, swallowing any failure (it may already be gone).
pub async fn delete_message(bot: &Bot, chat_id: ChatId, message_id: teloxide::types::MessageId) {
    let _ = bot.delete_message(chat_id, message_id).await;
}

/// Send each chunk as its own message, 100ms apart to stay well under
/// Telegram's per-chat rate limit.
pub async fn send_chunks(bot: &Bot, chat_id: ChatId, chunks: &[String]) {
    for (i, chunk) in chunks.iter().enumerate() {
        send_html(bot, chat_id, chunk).await;
        if i + 1 < chunks.len() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swallowable_phrases_match_case_insensitively() {
        assert!("Message Is Not Modified".to_ascii_lowercase().contains("message is not modified"));
        assert!("Too Many Requests: retry after 3".to_ascii_lowercase().contains("retry after"));
    }
}
