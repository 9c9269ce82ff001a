use thiserror::Error;

/// Errors surfaced by the kernel. Every variant aborts the enclosing action;
/// the host is responsible for rolling back the transaction and rejecting.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Std(#[from] rusqlite::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("insufficient balance: {context}")]
    InsufficientBalance { context: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("unauthorized")]
    Unauthorized {},

    #[error("stream already completed")]
    AlreadyCompleted {},

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<num_bigint::ParseBigIntError> for EngineError {
    fn from(e: num_bigint::ParseBigIntError) -> Self {
        EngineError::DecodeError(e.to_string())
    }
}
