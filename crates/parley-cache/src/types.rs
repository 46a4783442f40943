use std::collections::HashMap;

use parley_core::{MemorySource, Role, SessionId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPreset {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub user_id: UserId,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: f32,
    pub token_limit: i64,
    pub current_persona: String,
    pub enabled_tools: Vec<String>,
    pub title_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_style: Option<String>,
    pub tts_endpoint: Option<String>,
    pub api_presets: HashMap<String, ApiPreset>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserSettings {
    pub fn new_default(user_id: UserId, now: &str) -> Self {
        Self {
            user_id,
            api_key: None,
            base_url: None,
            model: None,
            temperature: 0.7,
            token_limit: 0,
            current_persona: "default".to_string(),
            enabled_tools: vec![
                "memory".into(),
                "url_fetch".into(),
                "web_search".into(),
                "wikipedia_search".into(),
                "tts".into(),
            ],
            title_model: None,
            tts_voice: None,
            tts_style: None,
            tts_endpoint: None,
            api_presets: HashMap::new(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub user_id: UserId,
    pub name: String,
    pub system_prompt: String,
    pub current_session_id: Option<SessionId>,
    pub created_at: String,
    pub updated_at: String,
}

impl Persona {
    pub const DEFAULT_NAME: &'static str = "default";

    pub fn new_default(user_id: UserId, now: &str) -> Self {
        Self {
            user_id,
            name: Self::DEFAULT_NAME.to_string(),
            system_prompt: String::new(),
            current_session_id: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub persona_name: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersonaTokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl PersonaTokenUsage {
    pub fn add(&mut self, prompt: i64, completion: i64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += prompt + completion;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub user_id: UserId,
    pub content: String,
    pub source: MemorySource,
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
}
