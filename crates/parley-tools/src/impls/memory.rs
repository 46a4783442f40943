use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{MemorySource, UserId};
use parley_llm::ToolDefinition;
use parley_services::Services;
use regex::Regex;
use serde::Deserialize;

use crate::registry::{Tool, ToolOutcome};

const INSTRUCTION: &str = "Use save_memory to remember durable facts about the user. \
You may also wrap a fact in [MEMORY: ...], [记忆: ...], or <memory>...</memory> \
directly in your reply as a fallback if the tool call is unavailable.";

fn fallback_patterns() -> Vec<Regex> {
    vec![
        Regex::new(r"(?s)\[MEMORY:\s*(.*?)\]").unwrap(),
        Regex::new(r"(?s)\[记忆:\s*(.*?)\]").unwrap(),
        Regex::new(r"(?s)<memory>\s*(.*?)\s*</memory>").unwrap(),
    ]
}

#[derive(Deserialize)]
struct SaveMemoryArgs {
    content: String,
}

pub struct MemoryTool {
    services: Arc<Services>,
    patterns: Vec<Regex>,
}

impl MemoryTool {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            patterns: fallback_patterns(),
        }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition> {
        if !enabled.contains(self.name()) {
            return vec![];
        }
        vec![ToolDefinition {
            name: "save_memory".to_string(),
            description: "Save a durable fact about the user for future conversations.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "The fact to remember." }
                },
                "required": ["content"],
            }),
        }]
    }

    fn function_names(&self) -> Vec<&str> {
        vec!["save_memory"]
    }

    async fn execute(&self, user_id: UserId, _function_name: &str, arguments_json: &str) -> ToolOutcome {
        let args: SaveMemoryArgs = match serde_json::from_str(arguments_json) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::Text(format!("invalid arguments: {e}")),
        };
        self.services.add_memory(user_id, &args.content, MemorySource::Ai).await;
        ToolOutcome::Text("memory saved".to_string())
    }

    fn get_instruction(&self) -> Option<&str> {
        Some(INSTRUCTION)
    }

    async fn enrich_system_prompt(&self, user_id: UserId, prompt: String, query: Option<&str>) -> String {
        let block = self.services.format_memories_for_prompt(user_id, query).await;
        if block.is_empty() {
            prompt
        } else {
            format!("{prompt}\n\n# What you know about this user\n{block}")
        }
    }

    async fn post_process(&self, user_id: UserId, text: String) -> String {
        let mut cleaned = text;
        for pattern in &self.patterns {
            let matches: Vec<String> = pattern
                .captures_iter(&cleaned)
                .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect();
            for fact in matches {
                self.services.add_memory(user_id, &fact, MemorySource::Ai).await;
            }
            cleaned = pattern.replace_all(&cleaned, "").trim().to_string();
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_cache::Cache;
    use parley_core::config::MemoryConfig;

    fn tool() -> MemoryTool {
        MemoryTool::new(Arc::new(Services::new(Arc::new(Cache::new()), None, MemoryConfig::default())))
    }

    #[tokio::test]
    async fn post_process_extracts_bracketed_fallback_tags_and_strips_them() {
        let tool = tool();
        let text = tool
            .post_process(UserId(1), "Got it. [MEMORY: likes black coffee] Anything else?".to_string())
            .await;
        assert!(!text.contains("MEMORY"));
        let saved = tool.services.list_memories(UserId(1));
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].content, "likes black coffee");
    }

    #[tokio::test]
    async fn execute_saves_via_services() {
        let tool = tool();
        let outcome = tool.execute(UserId(1), "save_memory", r#"{"content":"prefers tea"}"#).await;
        assert_eq!(outcome.into_text(), "memory saved");
        assert_eq!(tool.services.list_memories(UserId(1)).len(), 1);
    }

    #[test]
    fn definitions_are_empty_when_tool_disabled() {
        let tool = tool();
        let enabled = HashSet::new();
        assert!(tool.definitions(&enabled).is_empty());
    }
}
