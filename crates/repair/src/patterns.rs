//! Known error patterns and their prompt rewrites.
//!
//! Patterns are consulted in declaration order and the first matching
//! detector wins. A rewriter may decline (return `None`) when the inputs
//! already carry the requirement it would add.

use model::ErrorKind;

/// A rewrite produced by a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub prompt: String,
    pub context: String,
    /// Human-readable description of the applied fix, recorded in the
    /// error history when a retry succeeds.
    pub description: String,
}

type Detector = fn(&str) -> bool;
type Rewriter = fn(&str, &str) -> Option<Rewrite>;

struct Pattern {
    kind: ErrorKind,
    detect: Detector,
    rewrite: Rewriter,
}

/// The pattern table, in priority order.
fn patterns() -> &'static [Pattern] {
    static PATTERNS: std::sync::OnceLock<Vec<Pattern>> = std::sync::OnceLock::new();
    PATTERNS.get_or_init(|| vec![
        Pattern {
            kind: ErrorKind::MissingPragma,
            detect: |e| e.contains("pragma") && (e.contains("missing") || e.contains("not found")),
            rewrite: add_pragma_requirement,
        },
        Pattern {
            kind: ErrorKind::EmptyContext,
            detect: |e| e.contains("empty context") || e.contains("no context"),
            rewrite: add_fallback_template,
        },
        Pattern {
            kind: ErrorKind::CompilationError,
            detect: |e| e.contains("compilation") && e.contains("error"),
            rewrite: add_solidity_version_requirement,
        },
        Pattern {
            kind: ErrorKind::UnknownContractType,
            detect: |e| e.contains("unknown") && (e.contains("contract") || e.contains("type")),
            rewrite: add_contract_type_tag,
        },
        Pattern {
            kind: ErrorKind::MissingImport,
            detect: |e| e.contains("import") && (e.contains("not found") || e.contains("missing")),
            rewrite: add_import_requirement,
        },
        Pattern {
            kind: ErrorKind::VariableShadowing,
            detect: |e| e.contains("shadow"),
            rewrite: add_shadowing_rule,
        },
    ])
}

/// Classify an error message against the pattern table.
pub fn detect_error_pattern(error_message: &str) -> Option<ErrorKind> {
    let lower = error_message.to_lowercase();
    for pattern in patterns() {
        if (pattern.detect)(&lower) {
            tracing::info!(pattern = %pattern.kind, "Detected error pattern");
            return Some(pattern.kind.clone());
        }
    }
    None
}

/// Apply the rewriter of the first matching pattern.
pub(crate) fn apply_pattern(error_message: &str, prompt: &str, context: &str) -> Option<Rewrite> {
    let lower = error_message.to_lowercase();
    for pattern in patterns() {
        if (pattern.detect)(&lower) {
            let rewrite = (pattern.rewrite)(prompt, context);
            if rewrite.is_some() {
                tracing::info!(pattern = %pattern.kind, "Applied prompt repair");
            }
            return rewrite;
        }
    }
    None
}

/// Apply the rewriter for an already-classified error kind, bypassing
/// message detection. Used when the caller classified the error from a
/// richer signal than the message text.
pub(crate) fn apply_kind(kind: &ErrorKind, prompt: &str, context: &str) -> Option<Rewrite> {
    let pattern = patterns().iter().find(|p| &p.kind == kind)?;
    let rewrite = (pattern.rewrite)(prompt, context);
    if rewrite.is_some() {
        tracing::info!(pattern = %kind, "Applied prompt repair for classified kind");
    }
    rewrite
}

fn add_pragma_requirement(prompt: &str, context: &str) -> Option<Rewrite> {
    if prompt.to_lowercase().contains("pragma solidity")
        || context.to_lowercase().contains("pragma solidity")
    {
        return None;
    }
    Some(Rewrite {
        prompt: format!(
            "{prompt}\n\nIMPORTANT: The contract MUST include 'pragma solidity ^0.8.24;' \
             at the top of the file."
        ),
        context: context.to_string(),
        description: "appended explicit pragma version requirement".to_string(),
    })
}

fn add_fallback_template(prompt: &str, context: &str) -> Option<Rewrite> {
    if context.trim().len() >= 50 {
        return None;
    }
    Some(Rewrite {
        prompt: format!(
            "{prompt}\n\nSince no template context is available, generate a complete, \
             production-ready contract from scratch following these requirements:\n\
             - Use OpenZeppelin v5 compatible imports\n\
             - Include proper access controls (Ownable, ReentrancyGuard)\n\
             - Follow Solidity best practices and security patterns\n\
             - Include comprehensive error handling"
        ),
        context: context.to_string(),
        description: "appended fallback template instructions for empty context".to_string(),
    })
}

fn add_solidity_version_requirement(prompt: &str, context: &str) -> Option<Rewrite> {
    Some(Rewrite {
        prompt: format!(
            "{prompt}\n\nREQUIREMENT: The contract MUST be compatible with Solidity ^0.8.24 \
             and OpenZeppelin v5.x.\nEnsure all imports use OpenZeppelin v5 paths \
             (e.g., @openzeppelin/contracts/utils/ReentrancyGuard.sol)."
        ),
        context: context.to_string(),
        description: "appended Solidity and library version requirements".to_string(),
    })
}

fn add_contract_type_tag(prompt: &str, context: &str) -> Option<Rewrite> {
    let lower = prompt.to_lowercase();
    let contract_type = if lower.contains("erc20") || lower.contains("token") {
        "ERC20"
    } else if lower.contains("erc721") || lower.contains("nft") {
        "ERC721"
    } else if lower.contains("defi") || lower.contains("dex") || lower.contains("swap") {
        "DeFi"
    } else if lower.contains("dao") || lower.contains("governance") {
        "DAO"
    } else {
        return None;
    };

    Some(Rewrite {
        prompt: format!(
            "{prompt}\n\nContract Type: {contract_type}\nGenerate a {contract_type} contract \
             following industry-standard patterns and best practices."
        ),
        context: context.to_string(),
        description: format!("classified contract type as {contract_type}"),
    })
}

fn add_import_requirement(prompt: &str, context: &str) -> Option<Rewrite> {
    Some(Rewrite {
        prompt: format!(
            "{prompt}\n\nIMPORTANT: Ensure all required imports are included:\n\
             - Use OpenZeppelin v5 import paths\n\
             - Import all dependencies explicitly\n\
             - Verify import paths match OpenZeppelin v5 structure"
        ),
        context: context.to_string(),
        description: "appended explicit import-path requirements".to_string(),
    })
}

fn add_shadowing_rule(prompt: &str, context: &str) -> Option<Rewrite> {
    Some(Rewrite {
        prompt: format!(
            "{prompt}\n\nIMPORTANT: Avoid variable shadowing:\n\
             - Constructor parameters must not shadow state variables\n\
             - Use different names for parameters (e.g., _paramName instead of paramName)\n\
             - Ensure all variable names are unique within their scope"
        ),
        context: context.to_string(),
        description: "appended naming rule against variable shadowing".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_table() {
        assert_eq!(
            detect_error_pattern("Pragma directive is missing"),
            Some(ErrorKind::MissingPragma)
        );
        assert_eq!(
            detect_error_pattern("retriever returned no context"),
            Some(ErrorKind::EmptyContext)
        );
        assert_eq!(
            detect_error_pattern("Compilation finished with 2 errors"),
            Some(ErrorKind::CompilationError)
        );
        assert_eq!(
            detect_error_pattern("unknown contract category"),
            Some(ErrorKind::UnknownContractType)
        );
        assert_eq!(
            detect_error_pattern("import '@openzeppelin/foo.sol' not found"),
            Some(ErrorKind::MissingImport)
        );
        assert_eq!(
            detect_error_pattern("declaration shadows an existing declaration"),
            Some(ErrorKind::VariableShadowing)
        );
        assert_eq!(detect_error_pattern("out of gas"), None);
    }

    #[test]
    fn test_first_match_wins() {
        // Mentions both pragma/missing and import/missing: the pragma
        // pattern is declared first and takes it.
        let message = "pragma missing and import missing";
        assert_eq!(
            detect_error_pattern(message),
            Some(ErrorKind::MissingPragma)
        );
    }

    #[test]
    fn test_pragma_rewrite_declines_when_present() {
        let rewrite = apply_pattern(
            "pragma not found",
            "token with pragma solidity ^0.8.24 required",
            "",
        );
        assert!(rewrite.is_none());
    }

    #[test]
    fn test_pragma_rewrite_appends_requirement() {
        let rewrite = apply_pattern("pragma not found", "an erc20 please", "").unwrap();
        assert!(rewrite.prompt.contains("pragma solidity ^0.8.24"));
        assert!(rewrite.prompt.starts_with("an erc20 please"));
    }

    #[test]
    fn test_contract_type_classification() {
        let rewrite = apply_pattern("unknown contract type", "a governance votes thing dao", "")
            .unwrap();
        assert!(rewrite.prompt.contains("Contract Type: DAO"));

        // Nothing classifiable: pattern matches but rewriter declines.
        assert!(apply_pattern("unknown contract type", "a mystery machine", "").is_none());
    }

    #[test]
    fn test_empty_context_threshold() {
        let long_context = "x".repeat(80);
        assert!(apply_pattern("no context available", "prompt", &long_context).is_none());
        assert!(apply_pattern("no context available", "prompt", "tiny").is_some());
    }
}
