use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("message has no text payload")]
    EmptyMessage,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid url '{0}': expected an http, https, ws or wss scheme")]
    InvalidUrl(String),

    #[error("session {0} is not draining its responses")]
    SlowConsumer(String),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
