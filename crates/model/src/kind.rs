//! Closed error taxonomy for workflow error records.
//!
//! Errors are classified into tags rather than carried as typed values:
//! a stage catches whatever its collaborators raise, classifies it, and
//! records the tag plus the raw message. The taxonomy is closed, with an
//! `Other` variant that round-trips tags this version does not know about.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Classified error tag attached to an [`ErrorRecord`](crate::ErrorRecord).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Generation / compilation, repairable by prompt rewriting.
    MissingPragma,
    MissingImport,
    VariableShadowing,
    UnknownContractType,
    EmptyContext,
    CompilationError,
    // Deployment, rarely repairable by prompt rewriting.
    InsufficientFunds,
    Gas,
    RpcTimeout,
    Revert,
    ChainMismatch,
    // External services.
    RateLimit,
    Auth,
    RagUnavailable,
    PinFailed,
    // Orchestrator-initiated.
    Cancelled,
    // Anything that escapes classification.
    Unknown,
    /// A tag written by a newer or foreign producer.
    Other(String),
}

impl ErrorKind {
    /// Snake_case tag used on the wire and in persisted documents.
    pub fn as_str(&self) -> &str {
        match self {
            Self::MissingPragma => "missing_pragma",
            Self::MissingImport => "missing_import",
            Self::VariableShadowing => "variable_shadowing",
            Self::UnknownContractType => "unknown_contract_type",
            Self::EmptyContext => "empty_context",
            Self::CompilationError => "compilation_error",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Gas => "gas",
            Self::RpcTimeout => "rpc_timeout",
            Self::Revert => "revert",
            Self::ChainMismatch => "chain_mismatch",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::RagUnavailable => "rag_unavailable",
            Self::PinFailed => "pin_failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::Other(tag) => tag,
        }
    }

    /// Parse a tag back into the taxonomy. Unrecognised tags land in `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "missing_pragma" => Self::MissingPragma,
            "missing_import" => Self::MissingImport,
            "variable_shadowing" => Self::VariableShadowing,
            "unknown_contract_type" => Self::UnknownContractType,
            "empty_context" => Self::EmptyContext,
            "compilation_error" => Self::CompilationError,
            "insufficient_funds" => Self::InsufficientFunds,
            "gas" => Self::Gas,
            "rpc_timeout" => Self::RpcTimeout,
            "revert" => Self::Revert,
            "chain_mismatch" => Self::ChainMismatch,
            "rate_limit" => Self::RateLimit,
            "auth" => Self::Auth,
            "rag_unavailable" => Self::RagUnavailable,
            "pin_failed" => Self::PinFailed,
            "cancelled" => Self::Cancelled,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether a prompt rewrite has a realistic chance of fixing this error.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            Self::MissingPragma
                | Self::MissingImport
                | Self::VariableShadowing
                | Self::UnknownContractType
                | Self::EmptyContext
                | Self::CompilationError
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for kind in [
            ErrorKind::MissingPragma,
            ErrorKind::CompilationError,
            ErrorKind::InsufficientFunds,
            ErrorKind::Cancelled,
            ErrorKind::Unknown,
        ] {
            assert_eq!(ErrorKind::from_tag(kind.as_str()), kind);
        }
    }

    #[test]
    fn test_unknown_tag_lands_in_other() {
        let kind = ErrorKind::from_tag("quantum_flux");
        assert_eq!(kind, ErrorKind::Other("quantum_flux".to_string()));
        assert_eq!(kind.as_str(), "quantum_flux");
    }

    #[test]
    fn test_serde_uses_snake_case_tags() {
        let json = serde_json::to_string(&ErrorKind::VariableShadowing).unwrap();
        assert_eq!(json, "\"variable_shadowing\"");

        let back: ErrorKind = serde_json::from_str("\"rpc_timeout\"").unwrap();
        assert_eq!(back, ErrorKind::RpcTimeout);
    }

    #[test]
    fn test_repairable_split() {
        assert!(ErrorKind::MissingPragma.is_repairable());
        assert!(ErrorKind::CompilationError.is_repairable());
        assert!(!ErrorKind::InsufficientFunds.is_repairable());
        assert!(!ErrorKind::Cancelled.is_repairable());
    }
}
