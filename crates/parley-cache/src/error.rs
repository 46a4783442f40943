use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] parley_store::StoreError),

    #[error("schema invariant violated: {0}")]
    SchemaInvariantViolated(String),

    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
