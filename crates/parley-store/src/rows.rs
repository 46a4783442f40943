use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Row shape for `user_settings`. Mirrors the cache's in-memory representation
/// one-to-one; the cache is the only writer of this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettingsRow {
    pub user_id: i64,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub token_limit: i64,
    pub current_persona: String,
    pub enabled_tools: String,
    pub title_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_style: Option<String>,
    pub tts_endpoint: Option<String>,
    pub api_presets: HashMap<String, ApiPreset>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPreset {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaRow {
    pub user_id: i64,
    pub name: String,
    pub system_prompt: String,
    pub current_session_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub user_id: i64,
    pub persona_name: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessageRow {
    pub id: i64,
    pub session_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersonaTokenUsageRow {
    pub user_id: i64,
    pub persona_name: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRow {
    pub id: i64,
    pub user_id: i64,
    pub content: String,
    pub source: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
}
