use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("embedding api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse embedding response: {0}")]
    Parse(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Request(_) | EmbeddingError::RateLimited { .. }
        ) || matches!(self, EmbeddingError::Api { status, .. } if *status >= 500)
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
