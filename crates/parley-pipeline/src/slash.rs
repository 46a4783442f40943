//! Command surface: the chat-side `/`-commands, intercepted before a
//! message ever reaches the LLM. A flat sequence of string matches
//! returning an optional reply, covering the settings/persona/session/
//! memory command surface.
//!
//! Every command here resolves persona/session in "current" mode (reads
//! the live pointer at call time); the chat pipeline itself never goes
//! through this module mid-turn, since it pins persona/session once at
//! turn start and uses the "explicit" service mode for the rest of the
//! turn (see [`crate::pipeline::ChatPipeline::pin_context`]).

use std::collections::HashSet;

use parley_cache::ApiPreset;
use parley_core::config::DEFAULT_BASE_URL;
use parley_core::{MemorySource, UserId};
use parley_llm::LlmFactory;
use parley_services::Services;
use parley_tools::ToolRegistry;

/// Known model aliases for user-friendly `/set model` switching.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("mini", "gpt-4o-mini"),
    ("4o", "gpt-4o"),
    ("o-mini", "o4-mini"),
];

fn resolve_model_alias(input: &str) -> Option<&'static str> {
    let lower = input.to_ascii_lowercase();
    MODEL_ALIASES
        .iter()
        .find(|(alias, full)| lower == *alias || lower == *full)
        .map(|(_, full)| *full)
}

/// What the caller should do with a recognized command.
pub enum SlashOutcome {
    /// Send this text back to the user; the turn is over.
    Reply(String),
    /// `/retry`: pop the pinned session's last exchange and re-run the
    /// pipeline. The caller (the transport handler) owns pinning the
    /// context and invoking [`crate::pipeline::ChatPipeline::retry`].
    Retry,
    /// Not a recognized command; forward the message to the chat pipeline.
    NotACommand,
}

const HELP_TEXT: &str = "\
Commands:
/start, /help — this message
/clear — clear the current chat's history
/retry — regenerate the last reply
/settings — show your current configuration
/set <key> <value> — base_url, api_key, model, temperature, token_limit, voice, style, endpoint, title_model, tool <name> <on|off>, provider {list|save <name>|load <name>|delete <name>}
/persona [name] — show or switch persona
/persona new <name> [prompt] — create a persona
/persona delete <name> — delete a persona
/persona prompt [text] — show or set the current persona's system prompt
/chat [index] — show or switch chats
/chat new [title] — start a new chat
/chat rename <title> — rename the current chat
/chat delete <index> — delete a chat
/remember <text> — save a memory
/memories — list saved memories
/forget <num|all> — delete one memory or all of them
/usage — token usage and active configuration
/export — export the current chat as Markdown";

/// Dispatches one inbound message as a slash command. Returns
/// [`SlashOutcome::NotACommand`] for anything not beginning with `/` (or
/// not recognized), so the caller can fall through to the chat pipeline.
pub async fn dispatch_slash(
    user_id: UserId,
    text: &str,
    services: &Services,
    llm_factory: &dyn LlmFactory,
    tools: &ToolRegistry,
) -> SlashOutcome {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return SlashOutcome::NotACommand;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_lowercase();
    let rest = parts.next().unwrap_or("").trim();

    match cmd.as_str() {
        "/start" | "/help" => SlashOutcome::Reply(HELP_TEXT.to_string()),

        "/clear" => {
            let settings = services.get_user_settings(user_id);
            let session = services.current_session(user_id, &settings.current_persona);
            services.clear_conversation(session.id);
            SlashOutcome::Reply("Chat history cleared.".to_string())
        }

        "/retry" => SlashOutcome::Retry,

        "/settings" => SlashOutcome::Reply(render_settings(services, user_id)),

        "/set" => handle_set(user_id, rest, services, llm_factory, tools).await,

        "/persona" => handle_persona(user_id, rest, services),

        "/chat" => handle_chat(user_id, rest, services),

        "/remember" => {
            if rest.is_empty() {
                return SlashOutcome::Reply("Usage: /remember <text>".to_string());
            }
            services.add_memory(user_id, rest, MemorySource::User).await;
            SlashOutcome::Reply("Remembered.".to_string())
        }

        "/memories" => SlashOutcome::Reply(render_memories(services, user_id)),

        "/forget" => handle_forget(user_id, rest, services),

        "/usage" => SlashOutcome::Reply(render_usage(services, user_id)),

        "/export" => SlashOutcome::Reply(render_export(services, user_id)),

        _ => SlashOutcome::NotACommand,
    }
}

fn mask_api_key(key: &str) -> String {
    if key.len() <= 4 {
        "****".to_string()
    } else {
        format!("****{}", &key[key.len() - 4..])
    }
}

fn render_settings(services: &Services, user_id: UserId) -> String {
    let s = services.get_user_settings(user_id);
    format!(
        "API key: {}\nBase URL: {}\nModel: {}\nTemperature: {}\nToken limit: {}\nPersona: {}\nEnabled tools: {}\nTitle model: {}\nTTS voice: {}\nTTS style: {}\nTTS endpoint: {}",
        s.api_key.as_deref().map(mask_api_key).unwrap_or_else(|| "(not set)".to_string()),
        s.base_url.as_deref().unwrap_or("(default)"),
        s.model.as_deref().unwrap_or("(default)"),
        s.temperature,
        if s.token_limit == 0 { "unlimited".to_string() } else { s.token_limit.to_string() },
        s.current_persona,
        s.enabled_tools.join(", "),
        s.title_model.as_deref().unwrap_or("(default)"),
        s.tts_voice.as_deref().unwrap_or("(default)"),
        s.tts_style.as_deref().unwrap_or("(default)"),
        s.tts_endpoint.as_deref().unwrap_or("(default)"),
    )
}

async fn handle_set(
    user_id: UserId,
    rest: &str,
    services: &Services,
    llm_factory: &dyn LlmFactory,
    tools: &ToolRegistry,
) -> SlashOutcome {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let key = parts.next().unwrap_or("").to_ascii_lowercase();
    let value = parts.next().unwrap_or("").trim();

    if key.is_empty() {
        return SlashOutcome::Reply(
            "Usage: /set <base_url|api_key|model|temperature|token_limit|voice|style|endpoint|title_model|tool|provider> <value>".to_string(),
        );
    }

    match key.as_str() {
        "base_url" => {
            if value.is_empty() {
                return SlashOutcome::Reply("Usage: /set base_url <url>".to_string());
            }
            let v = value.to_string();
            services.update_user_setting(user_id, move |s| s.base_url = Some(v));
            SlashOutcome::Reply("Base URL updated.".to_string())
        }

        "api_key" => {
            if value.is_empty() {
                return SlashOutcome::Reply("Usage: /set api_key <key>".to_string());
            }
            // Validate before saving: an unusable key should never be
            // persisted silently.
            let base_url = services
                .get_user_settings(user_id)
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
            let candidate = llm_factory.build(value, &base_url);
            if let Err(e) = candidate.list_models().await {
                return SlashOutcome::Reply(format!("Could not validate API key: {e}. Key not saved."));
            }
            let v = value.to_string();
            services.update_user_setting(user_id, move |s| s.api_key = Some(v));
            SlashOutcome::Reply("API key validated and saved.".to_string())
        }

        "model" => {
            if value.is_empty() {
                let settings = services.get_user_settings(user_id);
                return SlashOutcome::Reply(format!(
                    "Current model: {}",
                    settings.model.as_deref().unwrap_or("(default)")
                ));
            }
            let resolved = resolve_model_alias(value).map(str::to_string).unwrap_or_else(|| value.to_string());
            services.update_user_setting(user_id, move |s| s.model = Some(resolved.clone()));
            SlashOutcome::Reply(format!("Model set to {value}."))
        }

        "temperature" => match value.parse::<f32>() {
            Ok(t) if (0.0..=2.0).contains(&t) => {
                services.update_user_setting(user_id, move |s| s.temperature = t);
                SlashOutcome::Reply(format!("Temperature set to {t}."))
            }
            _ => SlashOutcome::Reply("Temperature must be a number between 0 and 2.".to_string()),
        },

        "token_limit" => match value.parse::<i64>() {
            Ok(limit) if limit >= 0 => {
                services.update_user_setting(user_id, move |s| s.token_limit = limit);
                let msg = if limit == 0 { "unlimited".to_string() } else { limit.to_string() };
                SlashOutcome::Reply(format!("Token limit set to {msg}."))
            }
            _ => SlashOutcome::Reply("Token limit must be a non-negative integer (0 = unlimited).".to_string()),
        },

        "voice" => {
            if value.is_empty() {
                return SlashOutcome::Reply("Usage: /set voice <name>".to_string());
            }
            services.set_tts_voice(user_id, value);
            SlashOutcome::Reply("TTS voice updated.".to_string())
        }

        "style" => {
            if value.is_empty() {
                return SlashOutcome::Reply("Usage: /set style <name>".to_string());
            }
            let v = value.to_string();
            services.update_user_setting(user_id, move |s| s.tts_style = Some(v));
            SlashOutcome::Reply("TTS style updated.".to_string())
        }

        "endpoint" => {
            if value.is_empty() {
                return SlashOutcome::Reply("Usage: /set endpoint <url>".to_string());
            }
            let v = value.to_string();
            services.update_user_setting(user_id, move |s| s.tts_endpoint = Some(v));
            SlashOutcome::Reply("TTS endpoint updated.".to_string())
        }

        "title_model" => {
            if value.is_empty() {
                return SlashOutcome::Reply("Usage: /set title_model <name>".to_string());
            }
            let v = value.to_string();
            services.update_user_setting(user_id, move |s| s.title_model = Some(v));
            SlashOutcome::Reply("Title model updated.".to_string())
        }

        "tool" => handle_set_tool(user_id, value, services, tools),

        "provider" => handle_set_provider(user_id, value, services),

        other => SlashOutcome::Reply(format!("Unknown setting: {other}")),
    }
}

fn handle_set_tool(user_id: UserId, value: &str, services: &Services, tools: &ToolRegistry) -> SlashOutcome {
    let mut parts = value.split_whitespace();
    let (Some(name), Some(state)) = (parts.next(), parts.next()) else {
        return SlashOutcome::Reply("Usage: /set tool <name> <on|off>".to_string());
    };
    if !tools.tool_names().contains(&name) {
        return SlashOutcome::Reply(format!("Unknown tool: {name}. Known tools: {}", tools.tool_names().join(", ")));
    }
    let turn_on = match state {
        "on" => true,
        "off" => false,
        _ => return SlashOutcome::Reply("Usage: /set tool <name> <on|off>".to_string()),
    };
    let name = name.to_string();
    let name_for_msg = name.clone();
    services.update_user_setting(user_id, move |s| {
        let mut set: HashSet<String> = s.enabled_tools.drain(..).collect();
        if turn_on {
            set.insert(name.clone());
        } else {
            set.remove(&name);
        }
        s.enabled_tools = set.into_iter().collect();
    });
    let verb = if turn_on { "enabled" } else { "disabled" };
    SlashOutcome::Reply(format!("Tool '{name_for_msg}' {verb}."))
}

fn handle_set_provider(user_id: UserId, value: &str, services: &Services) -> SlashOutcome {
    let mut parts = value.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("").trim();

    match verb {
        "list" => {
            let settings = services.get_user_settings(user_id);
            if settings.api_presets.is_empty() {
                SlashOutcome::Reply("No saved providers.".to_string())
            } else {
                let names: Vec<&String> = settings.api_presets.keys().collect();
                SlashOutcome::Reply(format!("Saved providers: {}", names.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")))
            }
        }
        "save" => {
            if arg.is_empty() {
                return SlashOutcome::Reply("Usage: /set provider save <name>".to_string());
            }
            let settings = services.get_user_settings(user_id);
            let preset = ApiPreset {
                api_key: settings.api_key.clone().unwrap_or_default(),
                base_url: settings.base_url.clone().unwrap_or_default(),
                model: settings.model.clone().unwrap_or_default(),
            };
            services.save_api_preset(user_id, arg.to_string(), preset);
            SlashOutcome::Reply(format!("Saved current configuration as provider '{arg}'."))
        }
        "load" => {
            if arg.is_empty() {
                return SlashOutcome::Reply("Usage: /set provider load <name>".to_string());
            }
            let settings = services.get_user_settings(user_id);
            let Some(preset) = settings.api_presets.get(arg).cloned() else {
                return SlashOutcome::Reply(format!("No provider saved as '{arg}'."));
            };
            services.update_user_setting(user_id, move |s| {
                s.api_key = Some(preset.api_key.clone());
                s.base_url = Some(preset.base_url.clone());
                s.model = Some(preset.model.clone());
            });
            SlashOutcome::Reply(format!("Loaded provider '{arg}'."))
        }
        "delete" => {
            if arg.is_empty() {
                return SlashOutcome::Reply("Usage: /set provider delete <name>".to_string());
            }
            services.delete_api_preset(user_id, arg);
            SlashOutcome::Reply(format!("Deleted provider '{arg}'."))
        }
        // A bare `/set provider <name>` is deliberately NOT an alias for
        // `load`: it falls through as an unrecognized verb.
        other => SlashOutcome::Reply(format!(
            "Usage: /set provider {{list | save <name> | load <name> | delete <name>}} (got '{other}')"
        )),
    }
}

fn handle_persona(user_id: UserId, rest: &str, services: &Services) -> SlashOutcome {
    if rest.is_empty() {
        let settings = services.get_user_settings(user_id);
        let personas = services.get_personas(user_id);
        let names: Vec<&str> = personas.iter().map(|p| p.name.as_str()).collect();
        return SlashOutcome::Reply(format!("Current persona: {}\nAll personas: {}", settings.current_persona, names.join(", ")));
    }

    let mut parts = rest.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let tail = parts.next().unwrap_or("").trim();

    match head {
        "new" => {
            if tail.is_empty() {
                return SlashOutcome::Reply("Usage: /persona new <name> [prompt]".to_string());
            }
            let mut name_and_prompt = tail.splitn(2, char::is_whitespace);
            let name = name_and_prompt.next().unwrap_or("");
            let prompt = name_and_prompt.next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
            services.create_persona(user_id, name, prompt);
            SlashOutcome::Reply(format!("Persona '{name}' created."))
        }
        "delete" => {
            if tail.is_empty() {
                return SlashOutcome::Reply("Usage: /persona delete <name>".to_string());
            }
            match services.delete_persona(user_id, tail) {
                Ok(()) => SlashOutcome::Reply(format!("Persona '{tail}' deleted.")),
                Err(e) => SlashOutcome::Reply(e.to_string()),
            }
        }
        "prompt" => {
            let settings = services.get_user_settings(user_id);
            if tail.is_empty() {
                let persona = services.switch_persona(user_id, &settings.current_persona);
                return SlashOutcome::Reply(format!("Current persona prompt:\n{}", persona.system_prompt));
            }
            services.create_persona(user_id, &settings.current_persona, Some(tail.to_string()));
            SlashOutcome::Reply("Persona prompt updated.".to_string())
        }
        name => {
            let persona = services.switch_persona(user_id, name);
            services.update_user_setting(user_id, |s| s.current_persona = persona.name.clone());
            SlashOutcome::Reply(format!("Switched to persona '{}'.", persona.name))
        }
    }
}

fn handle_chat(user_id: UserId, rest: &str, services: &Services) -> SlashOutcome {
    let settings = services.get_user_settings(user_id);
    let persona = settings.current_persona.clone();

    if rest.is_empty() {
        let sessions = services.get_sessions(user_id, &persona);
        if sessions.is_empty() {
            return SlashOutcome::Reply("No chats yet. Use /chat new to start one.".to_string());
        }
        let listing: Vec<String> = sessions
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, if s.title.is_empty() { "(untitled)" } else { &s.title }))
            .collect();
        return SlashOutcome::Reply(listing.join("\n"));
    }

    let mut parts = rest.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    let tail = parts.next().unwrap_or("").trim();

    match head {
        "new" => {
            let session = services.create_session(user_id, &persona, tail);
            SlashOutcome::Reply(format!("New chat started (#{}).", session.id))
        }
        "rename" => {
            if tail.is_empty() {
                return SlashOutcome::Reply("Usage: /chat rename <title>".to_string());
            }
            let session = services.current_session(user_id, &persona);
            services.rename_session(session.id, tail);
            SlashOutcome::Reply(format!("Chat renamed to '{tail}'."))
        }
        "delete" => delete_chat_by_index(user_id, &persona, tail, services),
        index_str => match index_str.parse::<usize>() {
            Ok(n) if n >= 1 => {
                let sessions = services.get_sessions(user_id, &persona);
                match sessions.get(n - 1) {
                    Some(session) => {
                        services.switch_session(user_id, &persona, session.id);
                        SlashOutcome::Reply(format!("Switched to chat #{n}."))
                    }
                    None => SlashOutcome::Reply(format!("No chat at index {n}.")),
                }
            }
            _ => SlashOutcome::Reply("Usage: /chat [index] | new [title] | rename <title> | delete <index>".to_string()),
        },
    }
}

fn delete_chat_by_index(user_id: UserId, persona: &str, index_str: &str, services: &Services) -> SlashOutcome {
    match index_str.parse::<usize>() {
        Ok(n) if n >= 1 => {
            let sessions = services.get_sessions(user_id, persona);
            match sessions.get(n - 1) {
                Some(session) => {
                    services.delete_session(session.id);
                    SlashOutcome::Reply(format!("Chat #{n} deleted."))
                }
                None => SlashOutcome::Reply(format!("No chat at index {n}.")),
            }
        }
        _ => SlashOutcome::Reply("Usage: /chat delete <index>".to_string()),
    }
}

fn render_memories(services: &Services, user_id: UserId) -> String {
    let memories = services.list_memories(user_id);
    if memories.is_empty() {
        return "No memories saved.".to_string();
    }
    memories
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. [{}] {}", i + 1, m.source, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn handle_forget(user_id: UserId, rest: &str, services: &Services) -> SlashOutcome {
    if rest.eq_ignore_ascii_case("all") {
        services.clear_memories(user_id);
        return SlashOutcome::Reply("All memories forgotten.".to_string());
    }
    match rest.parse::<usize>() {
        Ok(n) if n >= 1 => {
            let memories = services.list_memories(user_id);
            match memories.get(n - 1) {
                Some(m) => {
                    services.delete_memory(user_id, m.id);
                    SlashOutcome::Reply(format!("Memory #{n} forgotten."))
                }
                None => SlashOutcome::Reply(format!("No memory at index {n}.")),
            }
        }
        _ => SlashOutcome::Reply("Usage: /forget <num|all>".to_string()),
    }
}

fn render_usage(services: &Services, user_id: UserId) -> String {
    let settings = services.get_user_settings(user_id);
    let session = services.current_session(user_id, &settings.current_persona);
    let usage = services.get_persona_token_usage(user_id, &settings.current_persona);
    let remaining = services
        .get_remaining_tokens(user_id)
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unlimited".to_string());
    format!(
        "Persona: {}\nChat: {}\nModel: {}\nPrompt tokens: {}\nCompletion tokens: {}\nTotal tokens: {}\nRemaining: {}",
        settings.current_persona,
        if session.title.is_empty() { "(untitled)".to_string() } else { session.title.clone() },
        settings.model.as_deref().unwrap_or("(default)"),
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens,
        remaining,
    )
}

fn render_export(services: &Services, user_id: UserId) -> String {
    let settings = services.get_user_settings(user_id);
    let session = services.current_session(user_id, &settings.current_persona);
    let history = services.get_history(session.id, usize::MAX);

    let mut out = format!(
        "# {}\n\nPersona: {} • Created: {}\n\n",
        if session.title.is_empty() { "Untitled chat" } else { &session.title },
        settings.current_persona,
        session.created_at
    );
    for m in &history {
        let header = match m.role {
            parley_core::Role::User => "## User",
            parley_core::Role::Assistant => "## Assistant",
        };
        out.push_str(header);
        out.push('\n');
        out.push_str(&m.content);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_cache::Cache;
    use parley_core::config::MemoryConfig;
    use parley_llm::{ChatRequest, LlmError, LlmProvider, StreamEvent};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct AlwaysOkLlm;

    #[async_trait]
    impl LlmProvider for AlwaysOkLlm {
        fn name(&self) -> &str {
            "test"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Ok(vec!["gpt-4o-mini".to_string()])
        }
    }

    struct AlwaysFailLlm;

    #[async_trait]
    impl LlmProvider for AlwaysFailLlm {
        fn name(&self) -> &str {
            "test"
        }
        async fn chat(&self, _req: &ChatRequest) -> Result<mpsc::Receiver<StreamEvent>, LlmError> {
            Err(LlmError::Auth)
        }
        async fn list_models(&self) -> Result<Vec<String>, LlmError> {
            Err(LlmError::Auth)
        }
    }

    struct AlwaysOkFactory;

    impl LlmFactory for AlwaysOkFactory {
        fn build(&self, _api_key: &str, _base_url: &str) -> Arc<dyn LlmProvider> {
            Arc::new(AlwaysOkLlm)
        }
    }

    struct AlwaysFailFactory;

    impl LlmFactory for AlwaysFailFactory {
        fn build(&self, _api_key: &str, _base_url: &str) -> Arc<dyn LlmProvider> {
            Arc::new(AlwaysFailLlm)
        }
    }

    fn services() -> Services {
        Services::new(Arc::new(Cache::new()), None, MemoryConfig::default())
    }

    fn tools() -> ToolRegistry {
        ToolRegistry::new(vec![])
    }

    fn text_of(outcome: SlashOutcome) -> String {
        match outcome {
            SlashOutcome::Reply(s) => s,
            SlashOutcome::Retry => "<retry>".to_string(),
            SlashOutcome::NotACommand => "<not-a-command>".to_string(),
        }
    }

    #[tokio::test]
    async fn plain_text_is_not_a_command() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        let outcome = dispatch_slash(UserId(1), "hello there", &services, &llm, &tools).await;
        assert!(matches!(outcome, SlashOutcome::NotACommand));
    }

    #[tokio::test]
    async fn set_api_key_rejected_when_validation_fails() {
        let services = services();
        let llm = AlwaysFailFactory;
        let tools = tools();
        let outcome = dispatch_slash(UserId(1), "/set api_key sk-bad", &services, &llm, &tools).await;
        assert!(text_of(outcome).contains("Could not validate"));
        assert!(services.get_user_settings(UserId(1)).api_key.is_none());
    }

    #[tokio::test]
    async fn set_api_key_saved_when_validation_succeeds() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        let _ = dispatch_slash(UserId(1), "/set api_key sk-good", &services, &llm, &tools).await;
        assert_eq!(services.get_user_settings(UserId(1)).api_key.as_deref(), Some("sk-good"));
    }

    #[tokio::test]
    async fn bare_set_provider_name_is_not_an_alias_for_load() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        let outcome = dispatch_slash(UserId(1), "/set provider myprovider", &services, &llm, &tools).await;
        assert!(text_of(outcome).contains("Usage: /set provider"));
    }

    #[tokio::test]
    async fn deleting_default_persona_reports_the_precondition_violation_verbatim() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        services.switch_persona(UserId(1), "default");
        let outcome = dispatch_slash(UserId(1), "/persona delete default", &services, &llm, &tools).await;
        assert!(text_of(outcome).to_lowercase().contains("default"));
    }

    #[tokio::test]
    async fn chat_new_then_index_one_switches_back_to_it() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        let _ = dispatch_slash(UserId(1), "/chat new first chat", &services, &llm, &tools).await;
        let _ = dispatch_slash(UserId(1), "/chat new second chat", &services, &llm, &tools).await;
        let outcome = dispatch_slash(UserId(1), "/chat 1", &services, &llm, &tools).await;
        assert!(text_of(outcome).contains("Switched to chat #1"));
    }

    #[tokio::test]
    async fn remember_then_forget_removes_the_memory() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        let _ = dispatch_slash(UserId(1), "/remember likes black coffee", &services, &llm, &tools).await;
        assert_eq!(services.list_memories(UserId(1)).len(), 1);
        let _ = dispatch_slash(UserId(1), "/forget 1", &services, &llm, &tools).await;
        assert!(services.list_memories(UserId(1)).is_empty());
    }

    #[tokio::test]
    async fn export_renders_role_headers_in_order() {
        let services = services();
        let llm = AlwaysOkFactory;
        let tools = tools();
        let settings = services.get_user_settings(UserId(1));
        let session = services.current_session(UserId(1), &settings.current_persona);
        services.add_user_message_to_session(session.id, "hi");
        services.add_assistant_message_to_session(session.id, "hello!");
        let outcome = dispatch_slash(UserId(1), "/export", &services, &llm, &tools).await;
        let text = text_of(outcome);
        assert!(text.find("## User").unwrap() < text.find("## Assistant").unwrap());
    }
}
