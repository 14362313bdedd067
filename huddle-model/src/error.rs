use thiserror::Error;

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid tier: {0}")]
    InvalidTier(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("invalid {topic} event: {reason}")]
    InvalidEvent { topic: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
