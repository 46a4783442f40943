//! Inbound media handling for the Telegram adapter.
//!
//! Downloads Telegram media via `get_file` + `download_file`. Photos
//! become `ImageAttachment`s for the vision-capable LLM client; text
//! documents are decoded and size-capped into the turn's text instead,
//! per the `"[File: {name}]"` persistence convention. Everything else
//! (video, audio, voice, stickers) is unsupported and is skipped with a
//! debug log.

use base64::Engine;
use parley_llm::ImageAttachment;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::{debug, warn};

/// Longest file body folded into a turn's text; anything beyond this is
/// truncated, matching the tool fetch path's truncation convention.
const MAX_FILE_CHARS: usize = 5000;

/// Media pulled out of one inbound message, ready to hand to the pipeline.
#[derive(Debug, Default)]
pub struct ExtractedMedia {
    pub images: Vec<ImageAttachment>,
    /// Already formatted as `"[File: {name}]\n{truncated body}"`, ready
    /// to append to the turn's user-visible text.
    pub file_text: Option<String>,
}

impl ExtractedMedia {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.file_text.is_none()
    }
}

/// Extract whatever this message carries, subject to `max_bytes` per file.
pub async fn extract(bot: &Bot, msg: &Message, max_bytes: u64) -> ExtractedMedia {
    let mut out = ExtractedMedia::default();

    if let Some(photos) = msg.photo() {
        if let Some(photo) = photos.last() {
            if let Some(bytes) = download(bot, &photo.file.id, max_bytes).await {
                out.images.push(ImageAttachment {
                    mime_type: "image/jpeg".to_string(),
                    data_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
                });
            }
        }
        return out;
    }

    if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.to_string()).unwrap_or_default();
        let name = doc.file_name.clone().unwrap_or_else(|| "attachment".to_string());
        let Some(bytes) = download(bot, &doc.file.id, max_bytes).await else {
            return out;
        };

        if mime.starts_with("image/") {
            out.images.push(ImageAttachment {
                mime_type: mime,
                data_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
            });
        } else {
            let text = String::from_utf8_lossy(&bytes);
            let truncated: String = text.chars().take(MAX_FILE_CHARS).collect();
            out.file_text = Some(format!("[File: {name}]\n{truncated}"));
        }
        return out;
    }

    if msg.video().is_some() || msg.audio().is_some() || msg.voice().is_some() || msg.sticker().is_some() {
        debug!("telegram: message carries unsupported media kind, skipping");
    }

    out
}

async fn download(bot: &Bot, file_id: &str, max_bytes: u64) -> Option<Vec<u8>> {
    let file = match bot.get_file(file_id).await {
        Ok(f) => f,
        Err(e) => {
            warn!(file_id, error = %e, "telegram: get_file failed");
            return None;
        }
    };

    if u64::from(file.size) > max_bytes {
        warn!(file_id, size = file.size, limit = max_bytes, "telegram: file exceeds size limit, skipping");
        return None;
    }

    let mut buf: Vec<u8> = Vec::new();
    if let Err(e) = bot.download_file(&file.path, &mut buf).await {
        warn!(file_id, error = %e, "telegram: download_file failed");
        return None;
    }
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_media_is_empty_by_default() {
        assert!(ExtractedMedia::default().is_empty());
    }

    #[test]
    fn extracted_media_with_an_image_is_not_empty() {
        let media = ExtractedMedia {
            images: vec![ImageAttachment { mime_type: "image/jpeg".to_string(), data_base64: String::new() }],
            file_text: None,
        };
        assert!(!media.is_empty());
    }
}
