//! # Config
//!
//! Read-only configuration surface for the workflow engine, plus the
//! fail-loud directory validator that runs at startup.
//!
//! The engine consumes a configuration mapping with a fixed set of
//! recognised keys; unrecognised keys are ignored so the same file can
//! carry settings for outer tooling. Network identities are strict: an
//! unknown network name is rejected with the list of valid options.

pub mod settings;
pub mod validator;

pub use settings::{
    ForgeflowConfig, GuardrailSettings, LlmCredentials, NetworkConfig, PinningCredentials,
    UploadScope,
};
pub use validator::{DirectoryReport, DirectoryValidator};

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown network '{name}'; valid networks: {valid}")]
    UnknownNetwork { name: String, valid: String },

    #[error("no networks configured")]
    NoNetworks,

    #[error("workspace directory validation failed:\n{0}")]
    Workspace(String),
}
