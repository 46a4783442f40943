use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::UserId;
use parley_llm::ToolDefinition;

/// Result of one tool invocation: text fed back to the LLM, or nothing at
/// all for fire-and-forget tools (TTS enqueues a clip instead of replying).
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Text(String),
    Silent,
}

impl ToolOutcome {
    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Text(s) => s,
            ToolOutcome::Silent => String::new(),
        }
    }
}

/// Pluggable capability exposed to the LLM. Every hook beyond `name`,
/// `definitions`, and `execute` defaults to a no-op, so a minimal tool
/// only implements those three.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Only returns non-empty when this tool's name is in `enabled`.
    fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition>;

    /// The function-call names this tool answers to. A tool that exposes
    /// several functions (e.g. `tts_speak` and `tts_list_voices` both
    /// live under the `tts` tool) overrides this; the default assumes a
    /// single function sharing the tool's own name.
    fn function_names(&self) -> Vec<&str> {
        vec![self.name()]
    }

    /// `function_name` is the name the LLM actually called, which for a
    /// multi-function tool may differ from `name()`.
    async fn execute(&self, user_id: UserId, function_name: &str, arguments_json: &str) -> ToolOutcome;

    /// Per-tool usage hint injected into the system prompt alongside the
    /// tool's JSON schema (e.g. the memory regex-fallback convention).
    fn get_instruction(&self) -> Option<&str> {
        None
    }

    /// Lets a tool inject content into the system prompt ahead of the
    /// turn (the memory tool's top-K retrieval). `query` is the user's
    /// current input, when there is one to key retrieval on.
    async fn enrich_system_prompt(&self, _user_id: UserId, prompt: String, _query: Option<&str>) -> String {
        prompt
    }

    /// Lets a tool scan the final assistant text after the turn (the
    /// memory tool's regex fallback-tag extraction).
    async fn post_process(&self, _user_id: UserId, text: String) -> String {
        text
    }
}

/// Every enabled tool, in stable registration order, built once at
/// startup. Dispatch maps a tool-call name to `Tool::execute`; an
/// unrecognised name synthesises an error result rather than failing
/// the turn.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Names of every registered tool, in registration order. Used by
    /// `/set tool <name> <on|off>` to validate the name before saving it.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition> {
        self.tools.iter().flat_map(|t| t.definitions(enabled)).collect()
    }

    pub fn instructions(&self, enabled: &HashSet<String>) -> String {
        self.tools
            .iter()
            .filter(|t| enabled.contains(t.name()))
            .filter_map(|t| t.get_instruction())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn enrich_system_prompt(&self, user_id: UserId, enabled: &HashSet<String>, mut prompt: String, query: Option<&str>) -> String {
        for tool in self.tools.iter().filter(|t| enabled.contains(t.name())) {
            prompt = tool.enrich_system_prompt(user_id, prompt, query).await;
        }
        prompt
    }

    pub async fn post_process(&self, user_id: UserId, enabled: &HashSet<String>, mut text: String) -> String {
        for tool in self.tools.iter().filter(|t| enabled.contains(t.name())) {
            text = tool.post_process(user_id, text).await;
        }
        text
    }

    pub async fn dispatch(&self, user_id: UserId, name: &str, arguments_json: &str) -> ToolOutcome {
        match self.tools.iter().find(|t| t.function_names().contains(&name)) {
            Some(tool) => tool.execute(user_id, name, arguments_json).await,
            None => ToolOutcome::Text(format!("unknown tool: {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn definitions(&self, _enabled: &HashSet<String>) -> Vec<ToolDefinition> {
            vec![]
        }
        async fn execute(&self, _user_id: UserId, _function_name: &str, arguments_json: &str) -> ToolOutcome {
            ToolOutcome::Text(arguments_json.to_string())
        }
    }

    #[tokio::test]
    async fn unknown_tool_name_synthesises_an_error_result_instead_of_failing() {
        let registry = ToolRegistry::new(vec![Arc::new(Echo)]);
        let outcome = registry.dispatch(UserId(1), "nonexistent", "{}").await;
        assert_eq!(outcome.into_text(), "unknown tool: nonexistent");
    }

    #[tokio::test]
    async fn dispatch_routes_to_the_matching_tool() {
        let registry = ToolRegistry::new(vec![Arc::new(Echo)]);
        let outcome = registry.dispatch(UserId(1), "echo", "{\"a\":1}").await;
        assert_eq!(outcome.into_text(), "{\"a\":1}");
    }
}
