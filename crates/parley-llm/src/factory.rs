use std::sync::Arc;

use crate::openai::OpenAiProvider;
use crate::provider::LlmProvider;

/// Builds a request-scoped [`LlmProvider`] from a user's own `api_key` and
/// `base_url`. Every user can point at a different OpenAI-compatible back
/// end, so the pipeline never holds a single shared provider — it asks the
/// factory for one right before each turn.
pub trait LlmFactory: Send + Sync {
    fn build(&self, api_key: &str, base_url: &str) -> Arc<dyn LlmProvider>;
}

/// Default factory: every provider is an [`OpenAiProvider`] sharing one
/// underlying `reqwest::Client` (connection pooling) but carrying its own
/// credentials and endpoint.
pub struct OpenAiProviderFactory {
    client: reqwest::Client,
}

impl OpenAiProviderFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OpenAiProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmFactory for OpenAiProviderFactory {
    fn build(&self, api_key: &str, base_url: &str) -> Arc<dyn LlmProvider> {
        Arc::new(OpenAiProvider::with_client(
            self.client.clone(),
            api_key.to_string(),
            base_url.to_string(),
        ))
    }
}
