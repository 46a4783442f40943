use std::collections::HashSet;

use async_trait::async_trait;
use parley_core::config::SearchConfig;
use parley_core::UserId;
use parley_llm::ToolDefinition;
use serde::Deserialize;
use tracing::warn;

use crate::registry::{Tool, ToolOutcome};

const MAX_RESULTS_CAP: usize = 10;
const DEFAULT_MAX_RESULTS: usize = 10;

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Clone)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

/// Fans a query out to whichever search backends are configured
/// (browserless-backed web search, an Ollama websearch endpoint) and
/// merges the results, deduping by URL. Either provider may be absent;
/// an empty `SearchConfig` just yields no hits rather than failing.
pub struct SearchTool {
    client: reqwest::Client,
    config: SearchConfig,
}

impl SearchTool {
    pub fn new(client: reqwest::Client, config: SearchConfig) -> Self {
        Self { client, config }
    }

    async fn query_browserless(&self, query: &str) -> Vec<SearchHit> {
        let (Some(url), Some(token)) = (&self.config.browserless_url, &self.config.browserless_token) else {
            return vec![];
        };
        let endpoint = format!("{}/chrome/search", url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("token", token.as_str()), ("q", query)])
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => match r.json::<Vec<BrowserlessHit>>().await {
                Ok(hits) => hits
                    .into_iter()
                    .map(|h| SearchHit {
                        title: h.title,
                        url: h.url,
                        snippet: h.snippet.unwrap_or_default(),
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "browserless search response did not parse");
                    vec![]
                }
            },
            Ok(r) => {
                warn!(status = %r.status(), "browserless search returned non-success status");
                vec![]
            }
            Err(e) => {
                warn!(error = %e, "browserless search request failed");
                vec![]
            }
        }
    }

    async fn query_ollama(&self, query: &str) -> Vec<SearchHit> {
        let Some(base) = &self.config.ollama_base_url else {
            return vec![];
        };
        let endpoint = format!("{}/api/web_search", base.trim_end_matches('/'));
        let resp = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => match r.json::<OllamaSearchResponse>().await {
                Ok(body) => body
                    .results
                    .into_iter()
                    .map(|h| SearchHit {
                        title: h.title,
                        url: h.url,
                        snippet: h.content.unwrap_or_default(),
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "ollama search response did not parse");
                    vec![]
                }
            },
            Ok(r) => {
                warn!(status = %r.status(), "ollama search returned non-success status");
                vec![]
            }
            Err(e) => {
                warn!(error = %e, "ollama search request failed");
                vec![]
            }
        }
    }
}

#[derive(Deserialize)]
struct BrowserlessHit {
    title: String,
    url: String,
    snippet: Option<String>,
}

#[derive(Deserialize)]
struct OllamaSearchResponse {
    #[serde(default)]
    results: Vec<OllamaHit>,
}

#[derive(Deserialize)]
struct OllamaHit {
    title: String,
    url: String,
    content: Option<String>,
}

fn dedup_by_url(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter().filter(|h| seen.insert(h.url.clone())).collect()
}

fn render(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "no results found".to_string();
    }
    hits.iter()
        .map(|h| format!("- {} ({})\n  {}", h.title, h.url, h.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition> {
        if !enabled.contains(self.name()) {
            return vec![];
        }
        vec![ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web for up-to-date information.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The search query." },
                    "provider": {
                        "type": "string",
                        "enum": ["browserless", "ollama", "all"],
                        "description": "Which backend to query. Defaults to all configured backends."
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results to return (capped at 10)."
                    }
                },
                "required": ["query"],
            }),
        }]
    }

    fn function_names(&self) -> Vec<&str> {
        vec!["web_search"]
    }

    async fn execute(&self, _user_id: UserId, _function_name: &str, arguments_json: &str) -> ToolOutcome {
        let args: SearchArgs = match serde_json::from_str(arguments_json) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::Text(format!("invalid arguments: {e}")),
        };
        let provider = args.provider.as_deref().unwrap_or("all");
        let mut hits = Vec::new();
        if provider == "browserless" || provider == "all" {
            hits.extend(self.query_browserless(&args.query).await);
        }
        if provider == "ollama" || provider == "all" {
            hits.extend(self.query_ollama(&args.query).await);
        }
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).min(MAX_RESULTS_CAP);
        let mut deduped = dedup_by_url(hits);
        deduped.truncate(max_results);
        ToolOutcome::Text(render(&deduped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_by_url_keeps_first_occurrence_only() {
        let hits = vec![
            SearchHit { title: "a".into(), url: "https://x".into(), snippet: "1".into() },
            SearchHit { title: "b".into(), url: "https://x".into(), snippet: "2".into() },
            SearchHit { title: "c".into(), url: "https://y".into(), snippet: "3".into() },
        ];
        let deduped = dedup_by_url(hits);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].title, "a");
    }

    #[test]
    fn render_reports_no_results_found_on_empty_hits() {
        assert_eq!(render(&[]), "no results found");
    }

    #[tokio::test]
    async fn execute_with_unconfigured_providers_yields_no_results() {
        let tool = SearchTool::new(reqwest::Client::new(), SearchConfig::default());
        let outcome = tool.execute(UserId(1), "web_search", r#"{"query":"rust async"}"#).await;
        assert_eq!(outcome.into_text(), "no results found");
    }

    #[test]
    fn max_results_is_capped_at_ten_even_when_requested_higher() {
        let hits: Vec<SearchHit> = (0..20)
            .map(|i| SearchHit { title: format!("t{i}"), url: format!("https://x/{i}"), snippet: String::new() })
            .collect();
        let mut deduped = dedup_by_url(hits);
        let max_results = 50usize.min(MAX_RESULTS_CAP);
        deduped.truncate(max_results);
        assert_eq!(deduped.len(), MAX_RESULTS_CAP);
    }
}
