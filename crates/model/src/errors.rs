//! Error types for the model crate.

use thiserror::Error;

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by context and bundle persistence.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    FileWrite { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("diagnostic bundle invalid: {0}")]
    InvalidBundle(String),
}
