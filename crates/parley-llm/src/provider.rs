use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LlmError;
use crate::types::{ChatRequest, StreamEvent};

/// A streaming chat back end. The stream is lazy, finite, and not
/// restartable — a fresh `chat()` call is required to retry.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, req: &ChatRequest) -> Result<mpsc::Receiver<StreamEvent>, LlmError>;

    /// Validates credentials and connectivity by listing the back end's
    /// available models. Used by `/set api_key` to reject a bad key
    /// before it is saved, rather than only discovering the failure on
    /// the next chat turn.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;
}
