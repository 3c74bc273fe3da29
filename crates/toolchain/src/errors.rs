//! Error types for toolchain bridges.

use model::ErrorKind;
use thiserror::Error;

use crate::deployer::DeployErrorKind;

/// Result alias for toolchain operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors raised by the bridge layer.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("'{tool}' is not installed or not on PATH")]
    NotInstalled { tool: String },

    #[error("'{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("compilation failed (exit {exit_code}): {stderr}")]
    CompilationFailed {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },

    #[error("deployment failed ({kind:?}): {message}")]
    Deploy {
        kind: DeployErrorKind,
        message: String,
    },

    #[error("constructor argument validation failed: {0}")]
    ConstructorArgs(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} produced unparseable output: {reason}")]
    BadOutput { tool: String, reason: String },
}

impl ToolError {
    /// Classify into the workflow error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CompilationFailed { .. } => ErrorKind::CompilationError,
            Self::Timeout { .. } => ErrorKind::RpcTimeout,
            Self::Deploy { kind, .. } => match kind {
                DeployErrorKind::Gas => ErrorKind::Gas,
                DeployErrorKind::InsufficientFunds => ErrorKind::InsufficientFunds,
                DeployErrorKind::Rpc => ErrorKind::RpcTimeout,
                DeployErrorKind::Revert => ErrorKind::Revert,
                DeployErrorKind::Unknown => ErrorKind::Unknown,
            },
            Self::ConstructorArgs(_) => ErrorKind::Revert,
            _ => ErrorKind::Unknown,
        }
    }
}
