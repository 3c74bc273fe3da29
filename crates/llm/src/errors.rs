//! Error types for LLM calls.

use model::ErrorKind;
use thiserror::Error;

/// Result alias for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors raised by providers and the router.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider '{0}' is not configured (missing API key)")]
    NotConfigured(String),

    #[error("rate limited by {provider}: {message}")]
    RateLimited { provider: String, message: String },

    #[error("authentication rejected by {provider}: {message}")]
    Auth { provider: String, message: String },

    #[error("request to {provider} timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("{provider} API error: {message}")]
    Api { provider: String, message: String },

    #[error("no model available for the request")]
    NoModelAvailable,

    #[error("all candidate models failed; last error: {0}")]
    AllModelsFailed(String),
}

impl LlmError {
    /// Classify into the workflow error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Auth { .. } | Self::NotConfigured(_) => ErrorKind::Auth,
            Self::Timeout { .. } => ErrorKind::RpcTimeout,
            Self::Api { .. } | Self::NoModelAvailable | Self::AllModelsFailed(_) => {
                ErrorKind::Unknown
            }
        }
    }
}
