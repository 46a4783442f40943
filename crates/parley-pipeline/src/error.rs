use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] parley_core::ParleyError),

    #[error(transparent)]
    Service(#[from] parley_services::ServiceError),

    #[error(transparent)]
    Llm(#[from] parley_llm::LlmError),
}

impl PipelineError {
    /// Text shown to the user; only a few well-known cases get a specific
    /// message, everything else falls back to the generic one.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Core(parley_core::ParleyError::ConfigMissing(_)) => {
                "No API key configured. Use /set api_key <key> to get started.".to_string()
            }
            PipelineError::Core(parley_core::ParleyError::QuotaExceeded) => {
                "You've used up your token budget for this persona. Use /set token_limit to raise it.".to_string()
            }
            PipelineError::Core(parley_core::ParleyError::PreconditionViolation(msg)) => msg.clone(),
            _ => parley_core::ParleyError::generic_user_message().to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
