//! Message delivery shaping: smart chunk splitting and a light
//! Markdown-to-Telegram-HTML conversion for the 4096-char HTML delivery
//! format.

/// A small safety margin below Telegram's actual 4096-char message cap.
pub const CHUNK_MAX: usize = 4090;

/// Code-fence-aware message splitter. When a split falls inside a
/// fenced code block, the fence is closed before the chunk boundary and
/// re-opened at the start of the next chunk.
pub fn split_chunks_smart(text: &str) -> Vec<String> {
    if text.len() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence_lang: Option<String> = None;

    for line in &lines {
        let cost = if current.is_empty() { line.len() } else { 1 + line.len() };

        if !current.is_empty() && current.len() + cost > CHUNK_MAX {
            if fence_lang.is_some() {
                current.push_str("\n```");
            }
            chunks.push(current);
            current = String::new();
            if let Some(ref lang) = fence_lang {
                if lang.is_empty() {
                    current.push_str("```\n");
                } else {
                    current.push_str("```");
                    current.push_str(lang);
                    current.push('\n');
                }
            }
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);

        let trimmed = line.trim_start();
        if let Some(after_fence) = trimmed.strip_prefix("```") {
            if fence_lang.is_some() {
                fence_lang = None;
            } else {
                fence_lang = Some(after_fence.trim().to_string());
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    let mut result = Vec::new();
    for chunk in chunks {
        if chunk.len() <= CHUNK_MAX {
            result.push(chunk);
        } else {
            let mut remaining = chunk.as_str();
            while remaining.len() > CHUNK_MAX {
                let split_at = remaining[..CHUNK_MAX]
                    .rfind('\n')
                    .or_else(|| remaining[..CHUNK_MAX].rfind(' '))
                    .unwrap_or(CHUNK_MAX);
                result.push(remaining[..split_at].to_string());
                remaining = remaining[split_at..].trim_start();
            }
            if !remaining.is_empty() {
                result.push(remaining.to_string());
            }
        }
    }

    result
}

/// Converts a conservative subset of Markdown (bold, italic, inline
/// code, fenced code blocks, links) to Telegram's HTML parse mode,
/// escaping the handful of characters HTML treats specially first so
/// they survive round-trip. Anything more exotic is left as plain text
/// rather than risk an unparsable tag.
pub fn markdown_to_telegram_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_code_block = false;
    for line in text.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            if in_code_block {
                out.push_str("<pre><code>");
            } else {
                out.push_str("</code></pre>\n");
            }
            continue;
        }
        if in_code_block {
            out.push_str(&escape_html(line));
            out.push('\n');
            continue;
        }
        out.push_str(&convert_inline(line));
        out.push('\n');
    }
    if in_code_block {
        out.push_str("</code></pre>\n");
    }
    out.trim_end_matches('\n').to_string()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn convert_inline(line: &str) -> String {
    let escaped = escape_html(line);
    let bold = replace_wrapped(&escaped, "**", "b");
    let code = replace_wrapped(&bold, "`", "code");
    replace_wrapped(&code, "*", "i")
}

/// Replaces paired occurrences of `marker` with `<tag>...</tag>`. An odd
/// number of markers leaves the trailing one untouched (no unmatched
/// HTML tag is ever emitted).
fn replace_wrapped(text: &str, marker: &str, tag: &str) -> String {
    let parts: Vec<&str> = text.split(marker).collect();
    if parts.len() < 3 {
        return text.to_string();
    }
    let mut out = String::new();
    let mut open = false;
    for (i, part) in parts.iter().enumerate() {
        out.push_str(part);
        if i + 1 < parts.len() {
            if open {
                out.push_str(&format!("</{tag}>"));
            } else {
                out.push_str(&format!("<{tag}>"));
            }
            open = !open;
        }
    }
    if open {
        // Unmatched trailing marker: reconstitute the literal text instead.
        return text.to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = split_chunks_smart("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn over_limit_splits_on_newline() {
        let line = "a".repeat(2000);
        let text = format!("{line}\n{line}\n{line}");
        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= CHUNK_MAX);
        }
    }

    #[test]
    fn code_fence_reopens_with_language_in_next_chunk() {
        let mut text = String::from("```python\n");
        for _ in 0..100 {
            text.push_str("print('hello world this is a reasonably long line of python code')\n");
        }
        text.push_str("```\n");
        let chunks = split_chunks_smart(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks[1].starts_with("```python"));
    }

    #[test]
    fn bold_and_italic_and_code_convert_to_html_tags() {
        let html = markdown_to_telegram_html("**bold** and *italic* and `code`");
        assert_eq!(html, "<b>bold</b> and <i>italic</i> and <code>code</code>");
    }

    #[test]
    fn fenced_block_becomes_pre_code() {
        let html = markdown_to_telegram_html("```\nlet x = 1;\n```");
        assert_eq!(html, "<pre><code>let x = 1;\n</code></pre>");
    }

    #[test]
    fn html_special_characters_are_escaped() {
        let html = markdown_to_telegram_html("if a < b && b > c");
        assert_eq!(html, "if a &lt; b &amp;&amp; b &gt; c");
    }

    #[test]
    fn unmatched_marker_is_left_untouched() {
        let html = markdown_to_telegram_html("half *open marker");
        assert_eq!(html, "half *open marker");
    }
}
