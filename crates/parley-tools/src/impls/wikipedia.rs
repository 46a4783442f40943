use std::collections::HashSet;

use async_trait::async_trait;
use parley_core::UserId;
use parley_llm::ToolDefinition;
use serde::Deserialize;
use tracing::warn;

use crate::registry::{Tool, ToolOutcome};

#[derive(Deserialize)]
struct WikipediaArgs {
    query: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Deserialize)]
struct OpenSearchResponse(String, Vec<String>, Vec<String>, Vec<String>);

#[derive(Deserialize)]
struct SummaryResponse {
    title: String,
    extract: String,
}

/// Looks the query up via the MediaWiki opensearch endpoint to find the
/// best-matching title, then fetches that page's REST summary.
/// `base_url_override`, when set, pins every request to one host
/// regardless of `language` (used to point at a mock server in tests);
/// otherwise each call targets `https://{language}.wikipedia.org`.
pub struct WikipediaTool {
    client: reqwest::Client,
    base_url_override: Option<String>,
}

impl WikipediaTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, base_url_override: None }
    }

    pub fn with_base_url(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url_override: Some(base_url) }
    }

    fn base_url(&self, language: &str) -> String {
        self.base_url_override
            .clone()
            .unwrap_or_else(|| format!("https://{language}.wikipedia.org"))
    }

    async fn resolve_title(&self, query: &str, language: &str) -> Option<String> {
        let endpoint = format!("{}/w/api.php", self.base_url(language));
        let resp = self
            .client
            .get(&endpoint)
            .query(&[
                ("action", "opensearch"),
                ("format", "json"),
                ("limit", "1"),
                ("search", query),
            ])
            .send()
            .await
            .ok()?;
        let parsed: OpenSearchResponse = resp.json().await.ok()?;
        parsed.1.into_iter().next()
    }

    async fn fetch_summary(&self, title: &str, language: &str) -> Option<SummaryResponse> {
        let encoded = title.replace(' ', "_");
        let endpoint = format!("{}/api/rest_v1/page/summary/{}", self.base_url(language), encoded);
        let resp = self.client.get(&endpoint).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json().await.ok()
    }
}

#[async_trait]
impl Tool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia_search"
    }

    fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition> {
        if !enabled.contains(self.name()) {
            return vec![];
        }
        vec![ToolDefinition {
            name: "wikipedia_search".to_string(),
            description: "Look up a topic summary on Wikipedia.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The topic to look up." },
                    "language": {
                        "type": "string",
                        "description": "Wikipedia language edition code, e.g. \"en\" or \"fr\". Defaults to \"en\"."
                    }
                },
                "required": ["query"],
            }),
        }]
    }

    fn function_names(&self) -> Vec<&str> {
        vec!["wikipedia_search"]
    }

    async fn execute(&self, _user_id: UserId, _function_name: &str, arguments_json: &str) -> ToolOutcome {
        let args: WikipediaArgs = match serde_json::from_str(arguments_json) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::Text(format!("invalid arguments: {e}")),
        };
        let language = args.language.as_deref().unwrap_or("en");
        let Some(title) = self.resolve_title(&args.query, language).await else {
            warn!(query = %args.query, language, "wikipedia opensearch found no matching title");
            return ToolOutcome::Text(format!("no wikipedia article found for \"{}\"", args.query));
        };
        match self.fetch_summary(&title, language).await {
            Some(summary) => ToolOutcome::Text(format!("{}: {}", summary.title, summary.extract)),
            None => ToolOutcome::Text(format!("no wikipedia article found for \"{}\"", args.query)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_name_is_wikipedia_search() {
        let tool = WikipediaTool::new(reqwest::Client::new());
        assert_eq!(tool.name(), "wikipedia_search");
    }

    #[test]
    fn definitions_are_empty_when_disabled() {
        let tool = WikipediaTool::new(reqwest::Client::new());
        assert!(tool.definitions(&HashSet::new()).is_empty());
    }

    #[test]
    fn base_url_defaults_to_english_and_honours_language_argument() {
        let tool = WikipediaTool::new(reqwest::Client::new());
        assert_eq!(tool.base_url("en"), "https://en.wikipedia.org");
        assert_eq!(tool.base_url("fr"), "https://fr.wikipedia.org");
    }

    #[test]
    fn base_url_override_ignores_language() {
        let tool = WikipediaTool::with_base_url(reqwest::Client::new(), "http://127.0.0.1:9999".to_string());
        assert_eq!(tool.base_url("fr"), "http://127.0.0.1:9999");
    }
}
