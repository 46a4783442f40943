use thiserror::Error;

/// Top-level error kinds, per the error taxonomy every component maps its
/// own failures onto at the pipeline boundary.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Required configuration (API key, bot token) is absent. No retry;
    /// the user is pointed at onboarding.
    #[error("configuration missing: {0}")]
    ConfigMissing(String),

    /// The user's token budget for this persona is exhausted.
    #[error("token quota exceeded")]
    QuotaExceeded,

    /// Network/rate-limit/timeout failure. Safe to retry later; not
    /// retried automatically except the tools-unsupported fallback.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A fetch target was rejected by the SSRF gate.
    #[error("url not permitted: {0}")]
    UrlRejected(String),

    /// The cache/sync engine observed a state that violates one of its
    /// own invariants (e.g. a dirty set referencing an unknown temp id).
    #[error("schema invariant violated: {0}")]
    SchemaInvariantViolated(String),

    /// A required precondition was violated (e.g. deleting the default
    /// persona). Message is shown to the user verbatim.
    #[error("{0}")]
    PreconditionViolation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    /// Short discriminator, used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            ParleyError::ConfigMissing(_) => "CONFIG_MISSING",
            ParleyError::QuotaExceeded => "QUOTA_EXCEEDED",
            ParleyError::Transient(_) => "TRANSIENT",
            ParleyError::UrlRejected(_) => "URL_REJECTED",
            ParleyError::SchemaInvariantViolated(_) => "SCHEMA_INVARIANT_VIOLATED",
            ParleyError::PreconditionViolation(_) => "PRECONDITION_VIOLATION",
            ParleyError::Database(_) => "DATABASE_ERROR",
            ParleyError::Serialization(_) => "SERIALIZATION_ERROR",
            ParleyError::Io(_) => "IO_ERROR",
        }
    }

    /// Text shown to the user for failures with no more specific surface.
    pub fn generic_user_message() -> &'static str {
        "Error. Please retry."
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
