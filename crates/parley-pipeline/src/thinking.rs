//! Strips `<think>`/`<thinking>`/`<reasoning>`/`[thinking]` wrapper tags
//! from model output so raw chain-of-thought never reaches the user.

const OPEN_TAGS: &[&str] = &["<think>", "<thinking>", "<reasoning>", "[thinking]"];
const CLOSE_TAGS: &[&str] = &["</think>", "</thinking>", "</reasoning>", "[/thinking]"];

/// Tracks whether we're currently inside a thinking block across chunk
/// boundaries, so the streaming loop can suppress visible output the
/// moment an opening tag appears, even if its matching close hasn't
/// arrived yet. A tag split across two delta chunks (e.g. `<thi` then
/// `nk>`) is not reassembled and will leak as literal text; providers
/// observed in practice emit these tags whole within one delta.
#[derive(Debug, Default)]
pub struct ThinkingFilter {
    inside: bool,
}

impl ThinkingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    /// Feeds one delta chunk through the filter, returning the portion
    /// that is safe to display. Updates `inside` as tags are crossed.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut visible = String::new();
        let mut rest = chunk;
        loop {
            if !self.inside {
                match find_any(rest, OPEN_TAGS) {
                    Some((idx, tag)) => {
                        visible.push_str(&rest[..idx]);
                        self.inside = true;
                        rest = &rest[idx + tag.len()..];
                    }
                    None => {
                        visible.push_str(rest);
                        break;
                    }
                }
            } else {
                match find_any(rest, CLOSE_TAGS) {
                    Some((idx, tag)) => {
                        self.inside = false;
                        rest = &rest[idx + tag.len()..];
                    }
                    None => break,
                }
            }
        }
        visible
    }
}

fn find_any<'a>(haystack: &'a str, needles: &[&'a str]) -> Option<(usize, &'a str)> {
    needles
        .iter()
        .filter_map(|n| haystack.find(n).map(|idx| (idx, *n)))
        .min_by_key(|(idx, _)| *idx)
}

/// Applied once to the complete final text before persistence. If
/// stripping the wrapper tags (and everything between them) would leave
/// an empty string, falls back to removing only the tag markers and
/// keeping the inner content — an assistant turn is never persisted
/// empty.
pub fn strip_for_persistence(text: &str) -> String {
    let fully_stripped = strip_blocks(text);
    if fully_stripped.trim().is_empty() {
        strip_markers_only(text).trim().to_string()
    } else {
        fully_stripped.trim().to_string()
    }
}

fn strip_blocks(text: &str) -> String {
    let mut out = String::new();
    let mut inside = false;
    let mut rest = text;
    loop {
        if !inside {
            match find_any(rest, OPEN_TAGS) {
                Some((idx, tag)) => {
                    out.push_str(&rest[..idx]);
                    inside = true;
                    rest = &rest[idx + tag.len()..];
                }
                None => {
                    out.push_str(rest);
                    break;
                }
            }
        } else {
            match find_any(rest, CLOSE_TAGS) {
                Some((idx, tag)) => {
                    inside = false;
                    rest = &rest[idx + tag.len()..];
                }
                None => {
                    // Unterminated block at end of text: drop the rest.
                    break;
                }
            }
        }
    }
    out
}

fn strip_markers_only(text: &str) -> String {
    let mut out = text.to_string();
    for tag in OPEN_TAGS.iter().chain(CLOSE_TAGS.iter()) {
        out = out.replace(tag, "");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_a_complete_reasoning_block() {
        let text = "<think>plan the answer</think>Hello there!";
        assert_eq!(strip_for_persistence(text), "Hello there!");
    }

    #[test]
    fn keeps_content_outside_multiple_blocks() {
        let text = "Intro. [thinking]scratch[/thinking] Middle. <reasoning>x</reasoning> End.";
        assert_eq!(strip_for_persistence(text), "Intro.  Middle.  End.");
    }

    #[test]
    fn falls_back_to_marker_only_removal_when_fully_stripped_is_empty() {
        let text = "<think>only thoughts, no reply</think>";
        let result = strip_for_persistence(text);
        assert_eq!(result, "only thoughts, no reply");
    }

    #[test]
    fn streaming_filter_suppresses_output_across_multiple_chunks() {
        let mut filter = ThinkingFilter::new();
        assert_eq!(filter.push("Hello <think>"), "Hello ");
        assert_eq!(filter.push("reasoning here"), "");
        assert!(filter.is_inside());
        assert_eq!(filter.push("more reasoning</think> world"), " world");
        assert!(!filter.is_inside());
    }
}
