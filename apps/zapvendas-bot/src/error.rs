use thiserror::Error;

/// Error taxonomy for the engine and payment coordinator. The transport
/// layer never sees these; callers map each variant to a user-facing
/// fallback message.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("external service unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
