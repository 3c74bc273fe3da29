//! Error types for the artifact store.

use model::ErrorKind;
use thiserror::Error;

use crate::scope::Scope;

/// Result alias for pinning operations.
pub type PinResult<T> = Result<T, PinError>;

/// Errors raised by uploads and registry maintenance.
#[derive(Debug, Error)]
pub enum PinError {
    #[error("{scope} pinning credentials not configured")]
    NotConfigured { scope: Scope },

    #[error("pinning upload failed ({status}): {body}")]
    UploadFailed { status: u16, body: String },

    #[error("pinning request error: {0}")]
    Request(String),

    #[error("pinning request timed out after {0}s")]
    Timeout(u64),

    #[error("registry persistence failed: {0}")]
    Registry(#[from] model::ModelError),

    #[error("gateway fetch failed for {cid}: {reason}")]
    GatewayFetch { cid: String, reason: String },
}

impl PinError {
    /// Classify into the workflow error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::RpcTimeout,
            Self::NotConfigured { .. } => ErrorKind::Auth,
            _ => ErrorKind::PinFailed,
        }
    }
}
