use std::sync::Arc;

use parley_cache::{ApiPreset, Cache, ConversationMessage, Memory, Persona, Session, UserSettings};
use parley_core::config::MemoryConfig;
use parley_core::{MemorySource, Role, SessionId, UserId};
use parley_embeddings::{cosine_similarity, EmbeddingClient};
use tracing::instrument;

use crate::error::{Result, ServiceError};

/// Thin semantic layer over the cache. Two conversation-write modes:
/// "current" (resolves persona/session at call time, used by command
/// handlers) and "explicit" (session id supplied by the caller, used by
/// the chat pipeline so context pinning holds for the whole turn).
pub struct Services {
    cache: Arc<Cache>,
    embeddings: Option<Arc<dyn EmbeddingClient>>,
    memory: MemoryConfig,
    /// Seeds a brand-new persona's `system_prompt`; has no effect on one
    /// that already exists. Empty when the operator hasn't configured one.
    default_system_prompt: String,
}

impl Services {
    pub fn new(cache: Arc<Cache>, embeddings: Option<Arc<dyn EmbeddingClient>>, memory: MemoryConfig) -> Self {
        Self::with_default_persona_prompt(cache, embeddings, memory, String::new())
    }

    pub fn with_default_persona_prompt(
        cache: Arc<Cache>,
        embeddings: Option<Arc<dyn EmbeddingClient>>,
        memory: MemoryConfig,
        default_system_prompt: String,
    ) -> Self {
        Self {
            cache,
            embeddings,
            memory,
            default_system_prompt,
        }
    }

    // ---- settings ---------------------------------------------------

    pub fn get_user_settings(&self, user: UserId) -> UserSettings {
        self.cache.get_or_create_settings(user)
    }

    pub fn update_user_setting<F>(&self, user: UserId, f: F)
    where
        F: FnOnce(&mut UserSettings),
    {
        self.cache.update_settings(user, f);
    }

    pub fn set_tts_voice(&self, user: UserId, voice: &str) {
        let voice = voice.to_string();
        self.update_user_setting(user, move |s| s.tts_voice = Some(voice));
    }

    pub fn save_api_preset(&self, user: UserId, name: String, preset: ApiPreset) {
        self.cache.save_api_preset(user, name, preset);
    }

    pub fn delete_api_preset(&self, user: UserId, name: &str) {
        self.cache.delete_api_preset(user, name);
    }

    // ---- personas -----------------------------------------------------

    pub fn get_personas(&self, user: UserId) -> Vec<Persona> {
        self.cache.list_personas(user)
    }

    /// Switches to (auto-creating if missing) the named persona and returns it.
    pub fn switch_persona(&self, user: UserId, name: &str) -> Persona {
        self.cache.get_or_create_persona(user, name, &self.default_system_prompt)
    }

    pub fn create_persona(&self, user: UserId, name: &str, prompt: Option<String>) -> Persona {
        let persona = self.cache.get_or_create_persona(user, name, &self.default_system_prompt);
        if let Some(p) = prompt {
            self.cache.set_persona_prompt(user, name, p);
        }
        persona
    }

    /// Deleting the `"default"` persona is a precondition violation, shown
    /// to the user verbatim.
    #[instrument(skip(self))]
    pub fn delete_persona(&self, user: UserId, name: &str) -> Result<()> {
        self.cache.delete_persona(user, name).map_err(|e| match e {
            parley_cache::CacheError::PreconditionViolation(m) => ServiceError::PreconditionViolation(m),
            other => other.into(),
        })
    }

    // ---- sessions -------------------------------------------------------

    pub fn get_sessions(&self, user: UserId, persona: &str) -> Vec<Session> {
        self.cache.list_sessions(user, persona)
    }

    pub fn create_session(&self, user: UserId, persona: &str, title: &str) -> Session {
        let session = self.cache.create_session(user, persona, title);
        self.cache.set_current_session(user, persona, session.id);
        session
    }

    pub fn switch_session(&self, user: UserId, persona: &str, session_id: SessionId) {
        self.cache.set_current_session(user, persona, session_id);
    }

    pub fn rename_session(&self, session_id: SessionId, title: &str) {
        self.cache.rename_session(session_id, title);
    }

    pub fn delete_session(&self, session_id: SessionId) {
        self.cache.delete_session(session_id);
    }

    /// Resolves the "current" session for a persona, creating one on
    /// demand if the persona has none yet (or its pointer dangles).
    pub fn current_session(&self, user: UserId, persona_name: &str) -> Session {
        let persona = self.cache.get_or_create_persona(user, persona_name, &self.default_system_prompt);
        if let Some(id) = persona.current_session_id {
            let existing = self
                .cache
                .list_sessions(user, persona_name)
                .into_iter()
                .find(|s| s.id == id);
            if let Some(s) = existing {
                return s;
            }
        }
        self.create_session(user, persona_name, "")
    }

    // ---- conversation (explicit mode: session_id pinned by the caller) --

    pub fn add_user_message_to_session(&self, session_id: SessionId, content: &str) {
        self.cache.add_message(session_id, Role::User, content);
    }

    pub fn add_assistant_message_to_session(&self, session_id: SessionId, content: &str) {
        self.cache.add_message(session_id, Role::Assistant, content);
    }

    pub fn get_history(&self, session_id: SessionId, limit: usize) -> Vec<ConversationMessage> {
        self.cache.get_history(session_id, limit)
    }

    pub fn pop_last_exchange(&self, session_id: SessionId) -> Option<String> {
        self.cache.pop_last_exchange(session_id)
    }

    pub fn clear_conversation(&self, session_id: SessionId) {
        self.cache.clear_conversation(session_id);
    }

    // ---- token usage ------------------------------------------------

    pub fn add_token_usage(&self, user: UserId, persona: &str, prompt: i64, completion: i64) {
        self.cache.add_token_usage(user, persona, prompt, completion);
    }

    pub fn get_persona_token_usage(&self, user: UserId, persona: &str) -> parley_cache::PersonaTokenUsage {
        self.cache.get_persona_token_usage(user, persona)
    }

    /// `None` means unlimited.
    pub fn get_remaining_tokens(&self, user: UserId) -> Option<i64> {
        self.cache.remaining_tokens(user)
    }

    // ---- memory (semantic memory subsystem) ------------------------------

    /// Embeds (if a provider is configured), dedupes against the user's
    /// existing embedded memories (deleting at most one near-duplicate),
    /// then inserts.
    #[instrument(skip(self, content))]
    pub async fn add_memory(&self, user: UserId, content: &str, source: MemorySource) -> i64 {
        let embedding = match &self.embeddings {
            Some(client) => client.embed(content).await.ok(),
            None => None,
        };

        if let Some(emb) = &embedding {
            let existing = self.cache.list_memories(user);
            let dup = existing
                .iter()
                .filter_map(|m| m.embedding.as_ref().map(|e| (m.id, cosine_similarity(emb, e))))
                .filter(|(_, score)| *score >= self.memory.dedup_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((dup_id, _)) = dup {
                self.cache.delete_memory(user, dup_id);
            }
        }

        self.cache.add_memory(user, content, source, embedding)
    }

    pub fn list_memories(&self, user: UserId) -> Vec<Memory> {
        self.cache.list_memories(user)
    }

    pub fn delete_memory(&self, user: UserId, memory_id: i64) {
        self.cache.delete_memory(user, memory_id);
    }

    pub fn clear_memories(&self, user: UserId) {
        self.cache.clear_memories(user);
    }

    /// Renders the Markdown-ish "`## Category\n- item`" block injected into
    /// the system prompt. With no query, no embedding client, or no
    /// embedded memory at all for this user, every memory is included
    /// unranked. Otherwise scores by cosine similarity against the query
    /// embedding, keeps everything at or above the similarity threshold,
    /// takes the top-K, and always also includes legacy memories that
    /// have no embedding (a safety net for memories saved before an
    /// embedding provider was configured).
    pub async fn format_memories_for_prompt(&self, user: UserId, query: Option<&str>) -> String {
        let memories = self.cache.list_memories(user);
        if memories.is_empty() {
            return String::new();
        }

        let has_any_embedding = memories.iter().any(|m| m.embedding.is_some());
        let ranked: Vec<Memory> = match (query, &self.embeddings, has_any_embedding) {
            (Some(q), Some(client), true) => match client.embed(q).await {
                Ok(q_emb) => {
                    let mut scored: Vec<(f32, Memory)> = memories
                        .iter()
                        .filter_map(|m| {
                            m.embedding
                                .as_ref()
                                .map(|e| (cosine_similarity(&q_emb, e), m.clone()))
                        })
                        .filter(|(score, _)| *score >= self.memory.similarity_threshold)
                        .collect();
                    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
                    let mut top: Vec<Memory> = scored
                        .into_iter()
                        .take(self.memory.top_k)
                        .map(|(_, m)| m)
                        .collect();
                    top.extend(memories.iter().filter(|m| m.embedding.is_none()).cloned());
                    top
                }
                Err(_) => memories,
            },
            _ => memories,
        };

        if ranked.is_empty() {
            return String::new();
        }

        let mut by_source: std::collections::BTreeMap<&'static str, Vec<&Memory>> = std::collections::BTreeMap::new();
        for m in &ranked {
            let header = match m.source {
                MemorySource::User => "Stated by user",
                MemorySource::Ai => "Noted by assistant",
            };
            by_source.entry(header).or_default().push(m);
        }

        let mut out = String::new();
        for (header, items) in by_source {
            out.push_str("## ");
            out.push_str(header);
            out.push('\n');
            for m in items {
                out.push_str("- ");
                out.push_str(&m.content);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedEmbedding(Vec<f32>);

    #[async_trait]
    impl EmbeddingClient for FixedEmbedding {
        async fn embed(&self, _text: &str) -> parley_embeddings::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    fn services_no_embeddings() -> Services {
        Services::new(Arc::new(Cache::new()), None, MemoryConfig::default())
    }

    #[test]
    fn switch_persona_seeds_a_brand_new_persona_from_the_configured_default_prompt() {
        let services = Services::with_default_persona_prompt(
            Arc::new(Cache::new()),
            None,
            MemoryConfig::default(),
            "You are a helpful assistant.".to_string(),
        );
        let persona = services.switch_persona(UserId(1), "default");
        assert_eq!(persona.system_prompt, "You are a helpful assistant.");
    }

    #[test]
    fn switch_persona_does_not_overwrite_an_existing_persona_prompt() {
        let services = Services::with_default_persona_prompt(
            Arc::new(Cache::new()),
            None,
            MemoryConfig::default(),
            "default prompt".to_string(),
        );
        services.create_persona(UserId(1), "default", Some("custom prompt".to_string()));
        let persona = services.switch_persona(UserId(1), "default");
        assert_eq!(persona.system_prompt, "custom prompt");
    }

    #[tokio::test]
    async fn add_memory_without_embedding_client_stores_no_vector() {
        let services = services_no_embeddings();
        services.add_memory(UserId(1), "likes tea", MemorySource::User).await;
        let memories = services.list_memories(UserId(1));
        assert_eq!(memories.len(), 1);
        assert!(memories[0].embedding.is_none());
    }

    #[tokio::test]
    async fn add_memory_dedupes_near_identical_embeddings() {
        let cache = Arc::new(Cache::new());
        let embeddings: Arc<dyn EmbeddingClient> = Arc::new(FixedEmbedding(vec![1.0, 0.0]));
        let services = Services::new(cache, Some(embeddings), MemoryConfig::default());

        services.add_memory(UserId(1), "first", MemorySource::User).await;
        services.add_memory(UserId(1), "duplicate", MemorySource::User).await;

        assert_eq!(services.list_memories(UserId(1)).len(), 1);
    }

    #[test]
    fn deleting_default_persona_is_a_precondition_violation() {
        let services = services_no_embeddings();
        services.switch_persona(UserId(1), "default");
        assert!(matches!(
            services.delete_persona(UserId(1), "default"),
            Err(ServiceError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn unlimited_token_budget_is_none() {
        let services = services_no_embeddings();
        services.get_user_settings(UserId(1));
        assert_eq!(services.get_remaining_tokens(UserId(1)), None);
    }
}
