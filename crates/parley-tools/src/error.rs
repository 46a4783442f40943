use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("url not permitted: {0}")]
    UrlRejected(String),

    #[error("tool call timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;
