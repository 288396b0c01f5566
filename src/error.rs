//! Error types for politely.

use thiserror::Error;

/// Result type alias using politely's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// LLM or embedding call fault. The message is user-safe Korean text.
    #[error("{message}")]
    AiTransform { message: String },

    /// Request body failed schema-level validation
    #[error("{0}")]
    Validation(String),

    /// Tier restriction (length caps, feature gates)
    #[error("{0}")]
    TierRestriction(String),

    /// Configuration error (missing or malformed env keys)
    #[error("Configuration error: {0}")]
    Config(String),

    /// RAG storage error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an AI transform error with a user-safe Korean message.
    pub fn ai_transform(message: impl Into<String>) -> Self {
        Self::AiTransform {
            message: message.into(),
        }
    }

    /// The generic user-safe message for unexpected AI faults.
    pub fn ai_transform_generic() -> Self {
        Self::AiTransform {
            message: "AI 변환 서비스에 일시적인 오류가 발생했습니다. 잠시 후 다시 시도해주세요."
                .to_string(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a tier restriction error.
    pub fn tier_restriction(message: impl Into<String>) -> Self {
        Self::TierRestriction(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error is the fatal LLM-fault variant.
    pub fn is_ai_transform(&self) -> bool {
        matches!(self, Self::AiTransform { .. })
    }
}
