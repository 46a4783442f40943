use thiserror::Error;

/// Failure kinds classified the way the pipeline needs to react: some are
/// worth a silent internal fallback, others end the turn immediately.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    /// Bad/missing credentials. Fatal for this turn.
    #[error("authentication failed")]
    Auth,

    /// Transient; caller may retry after the given delay.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The configured model does not exist. Fatal, surfaced generically.
    #[error("model not found")]
    ModelNotFound,

    /// Transient network-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Transient: the request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Catch-all API error, classified transient only for 5xx.
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Network(_) | LlmError::Timeout => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Auth | LlmError::ModelNotFound => false,
        }
    }

    /// True when the failure text indicates the back end doesn't support
    /// tool/function calling at all, the trigger for the pipeline's
    /// tools-unsupported retry.
    pub fn looks_like_tools_unsupported(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        lower.contains("tool") || lower.contains("function")
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
