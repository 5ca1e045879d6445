use thiserror::Error;

/// Errors produced by the upload protocol layer.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("protocol error: no active transfer")]
    NoActiveTransfer,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl UploadError {
    /// Whether the connection must be closed after reporting this error.
    pub fn closes_connection(&self) -> bool {
        matches!(self, UploadError::RateLimitExceeded)
    }
}

pub type UploadResult<T> = Result<T, UploadError>;
