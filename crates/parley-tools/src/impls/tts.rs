use std::collections::{HashSet, VecDeque};

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parley_core::config::TtsConfig;
use parley_core::UserId;
use parley_llm::ToolDefinition;
use parley_services::Services;
use serde::Deserialize;
use tracing::warn;

use crate::registry::{Tool, ToolOutcome};

/// A synthesised clip waiting to be delivered to the user as a voice
/// message once the turn's text reply has finished streaming.
#[derive(Debug, Clone)]
pub struct VoiceClip {
    pub voice: String,
    pub audio: Vec<u8>,
    pub mime_type: String,
}

#[derive(Deserialize)]
struct SpeakArgs {
    text: String,
    #[serde(default)]
    voice: Option<String>,
}

#[derive(serde::Serialize)]
struct TtsRequest<'a> {
    input: &'a str,
    voice: &'a str,
}

/// `tts_speak` synthesises audio and queues it rather than returning it
/// directly, so the pipeline can deliver text first and voice clips
/// after, draining `pending` once the turn's streaming loop completes.
/// Voice resolution order: the user's saved setting, then the explicit
/// tool-call argument, then the configured environment default.
pub struct TtsTool {
    client: reqwest::Client,
    config: TtsConfig,
    services: Arc<Services>,
    pending: DashMap<UserId, VecDeque<VoiceClip>>,
}

impl TtsTool {
    pub fn new(client: reqwest::Client, config: TtsConfig, services: Arc<Services>) -> Self {
        Self {
            client,
            config,
            services,
            pending: DashMap::new(),
        }
    }

    pub fn drain_pending(&self, user_id: UserId) -> Vec<VoiceClip> {
        self.pending
            .remove(&user_id)
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default()
    }

    fn resolve_voice(&self, user_id: UserId, requested: Option<&str>) -> Option<String> {
        let settings = self.services.get_user_settings(user_id);
        settings
            .tts_voice
            .clone()
            .or_else(|| requested.map(|v| v.to_string()))
            .or_else(|| self.config.default_voice.clone())
    }

    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, String> {
        let endpoint = self
            .config
            .endpoint
            .as_ref()
            .ok_or_else(|| "no tts endpoint configured".to_string())?;
        let mut req = self.client.post(endpoint).json(&TtsRequest { input: text, voice });
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("tts backend returned status {}", resp.status()));
        }
        resp.bytes().await.map(|b| b.to_vec()).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Tool for TtsTool {
    fn name(&self) -> &str {
        "tts"
    }

    fn definitions(&self, enabled: &HashSet<String>) -> Vec<ToolDefinition> {
        if !enabled.contains(self.name()) {
            return vec![];
        }
        vec![
            ToolDefinition {
                name: "tts_speak".to_string(),
                description: "Speak a short message aloud as a voice note.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "The text to speak." },
                        "voice": { "type": "string", "description": "Optional voice name override." }
                    },
                    "required": ["text"],
                }),
            },
            ToolDefinition {
                name: "tts_list_voices".to_string(),
                description: "List the voices available for text-to-speech.".to_string(),
                parameters: serde_json::json!({ "type": "object", "properties": {} }),
            },
        ]
    }

    fn function_names(&self) -> Vec<&str> {
        vec!["tts_speak", "tts_list_voices"]
    }

    async fn execute(&self, user_id: UserId, function_name: &str, arguments_json: &str) -> ToolOutcome {
        if function_name == "tts_list_voices" {
            return match &self.config.default_voice {
                Some(voice) => ToolOutcome::Text(voice.clone()),
                None => ToolOutcome::Text("no voices configured".to_string()),
            };
        }

        let args: SpeakArgs = match serde_json::from_str(arguments_json) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::Text(format!("invalid arguments: {e}")),
        };
        let Some(voice) = self.resolve_voice(user_id, args.voice.as_deref()) else {
            return ToolOutcome::Text("no voice configured".to_string());
        };
        match self.synthesize(&args.text, &voice).await {
            Ok(audio) => {
                self.pending.entry(user_id).or_default().push_back(VoiceClip {
                    voice,
                    audio,
                    mime_type: "audio/mpeg".to_string(),
                });
                ToolOutcome::Silent
            }
            Err(e) => {
                warn!(error = %e, "tts synthesis failed");
                ToolOutcome::Text(format!("could not synthesize speech: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_cache::Cache;
    use parley_core::config::MemoryConfig;

    fn tool_with(default_voice: Option<&str>) -> TtsTool {
        let services = Arc::new(Services::new(Arc::new(Cache::new()), None, MemoryConfig::default()));
        TtsTool::new(
            reqwest::Client::new(),
            TtsConfig { endpoint: None, api_key: None, default_voice: default_voice.map(String::from) },
            services,
        )
    }

    #[test]
    fn resolve_voice_prefers_argument_over_default_when_no_user_setting() {
        let tool = tool_with(Some("alloy"));
        assert_eq!(tool.resolve_voice(UserId(1), Some("nova")), Some("nova".to_string()));
        assert_eq!(tool.resolve_voice(UserId(1), None), Some("alloy".to_string()));
    }

    #[test]
    fn resolve_voice_prefers_saved_user_setting_over_argument_and_default() {
        let tool = tool_with(Some("alloy"));
        tool.services.set_tts_voice(UserId(1), "shimmer");
        assert_eq!(tool.resolve_voice(UserId(1), Some("nova")), Some("shimmer".to_string()));
    }

    #[test]
    fn drain_pending_empties_the_queue_for_that_user() {
        let tool = tool_with(None);
        tool.pending.entry(UserId(1)).or_default().push_back(VoiceClip {
            voice: "alloy".to_string(),
            audio: vec![1, 2, 3],
            mime_type: "audio/mpeg".to_string(),
        });
        let drained = tool.drain_pending(UserId(1));
        assert_eq!(drained.len(), 1);
        assert!(tool.drain_pending(UserId(1)).is_empty());
    }
}
