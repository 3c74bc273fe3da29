//! User-facing failure advice.

use model::{ErrorKind, Stage};
use serde::Serialize;

/// A rendered, actionable failure message.
#[derive(Debug, Clone, Serialize)]
pub struct FriendlyError {
    pub friendly_message: String,
    /// Ordered, most relevant first.
    pub suggestions: Vec<String>,
    pub error: String,
    pub stage: Stage,
    pub help_text: String,
}

/// Build advice for a failed stage. Stage-specific suggestions come first
/// in a fixed order; error-type-specific suggestions are inserted at the
/// front when the classification warrants it.
pub fn friendly_error(stage: Stage, error: &str, error_type: Option<&ErrorKind>) -> FriendlyError {
    let (friendly_message, mut suggestions) = match stage {
        Stage::Generation => (
            "Contract generation failed. This might be due to:".to_string(),
            vec![
                "Check your prompt for typos or unclear requirements".to_string(),
                "Try reformulating your prompt with more specific technical details".to_string(),
                "Ensure you've specified the contract type (ERC20, ERC721, DeFi, etc.)".to_string(),
                "Upload a sample template to the artifact store for best results with similar contracts"
                    .to_string(),
            ],
        ),
        Stage::Compilation => (
            "Contract compilation failed. Common issues:".to_string(),
            vec![
                "Check the diagnostic bundle for detailed compilation errors".to_string(),
                "Verify all imports are using OpenZeppelin v5 compatible paths".to_string(),
                "Ensure Solidity version is ^0.8.24 or compatible".to_string(),
                "Check for variable shadowing or other Solidity syntax issues".to_string(),
            ],
        ),
        Stage::DependencyResolution => (
            "Dependency resolution failed. Try:".to_string(),
            vec![
                "Verify all required dependencies are available".to_string(),
                "Check network connectivity if fetching from external sources".to_string(),
                "Ensure Foundry remappings are correctly configured".to_string(),
                "Review the diagnostic bundle for specific dependency errors".to_string(),
            ],
        ),
        Stage::Deployment => (
            "Contract deployment failed. Possible causes:".to_string(),
            vec![
                "Check your wallet has sufficient funds for gas".to_string(),
                "Verify the network RPC endpoint is accessible".to_string(),
                "Ensure the contract compiled successfully before deployment".to_string(),
                "Review deployment logs in the diagnostic bundle".to_string(),
            ],
        ),
        _ => (
            format!("Workflow stage '{stage}' failed."),
            vec![
                "Check the diagnostic bundle for detailed error information".to_string(),
                "Review the error message above for specific issues".to_string(),
                "Try running the workflow again with --verbose for more details".to_string(),
            ],
        ),
    };

    if let Some(kind) = error_type {
        match kind {
            ErrorKind::MissingPragma => suggestions.insert(
                0,
                "Ensure your prompt specifies the 'pragma solidity ^0.8.24;' requirement"
                    .to_string(),
            ),
            ErrorKind::VariableShadowing => suggestions.insert(
                0,
                "Variable shadowing detected - ensure constructor parameters don't shadow state variables"
                    .to_string(),
            ),
            ErrorKind::MissingImport => suggestions.insert(
                0,
                "Import error - verify all OpenZeppelin imports use v5 paths".to_string(),
            ),
            ErrorKind::InsufficientFunds => suggestions.insert(
                0,
                "Deployer account needs more native tokens on the target network".to_string(),
            ),
            ErrorKind::RpcTimeout => suggestions.insert(
                0,
                "The RPC endpoint timed out - check the endpoint URL or try again later"
                    .to_string(),
            ),
            _ => {}
        }
    }

    FriendlyError {
        friendly_message,
        suggestions,
        error: error.to_string(),
        stage,
        help_text: "For more help, check the diagnostic bundle or the docs/ directory".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_specific_message() {
        let advice = friendly_error(Stage::Compilation, "boom", None);
        assert!(advice.friendly_message.contains("compilation"));
        assert_eq!(advice.suggestions.len(), 4);
    }

    #[test]
    fn test_error_specific_suggestion_comes_first() {
        let advice = friendly_error(
            Stage::Deployment,
            "insufficient funds for transfer",
            Some(&ErrorKind::InsufficientFunds),
        );
        assert!(advice.suggestions[0].contains("Deployer account needs more native tokens"));
        assert_eq!(advice.suggestions.len(), 5);
    }

    #[test]
    fn test_unlisted_stage_gets_generic_advice() {
        let advice = friendly_error(Stage::Verification, "explorer said no", None);
        assert!(advice.friendly_message.contains("verification"));
        assert_eq!(advice.suggestions.len(), 3);
    }
}
