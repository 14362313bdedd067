use huddle_model::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HuddleError {
    /// Malformed input rejected before any store write or publish.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(String),

    /// Boot-time schedule reconciliation failed; the process must not
    /// continue starting.
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    #[error("Invalid cron expression `{expression}`: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModelError> for HuddleError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Serialization(inner) => HuddleError::Serialization(inner),
            other => HuddleError::Validation(other.to_string()),
        }
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for HuddleError {
    fn from(err: sqlx::Error) -> Self {
        HuddleError::Store(err.to_string())
    }
}

impl HuddleError {
    pub fn is_validation(&self) -> bool {
        matches!(self, HuddleError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, HuddleError>;
