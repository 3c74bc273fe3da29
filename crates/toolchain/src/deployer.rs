//! Deployment bridge with constructor-argument validation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::errors::{ToolError, ToolResult};
use crate::process::run_with_timeout;

/// Broadcast timeout.
const DEPLOY_TIMEOUT_SECS: u64 = 120;

/// Classified deployment failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Gas,
    InsufficientFunds,
    Rpc,
    Revert,
    Unknown,
}

/// A deployment request. The private key is consumed here and never
/// serialized anywhere.
#[derive(Clone)]
pub struct DeployRequest {
    pub source: String,
    pub contract_name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub constructor_args: Vec<String>,
    pub private_key: String,
}

impl std::fmt::Debug for DeployRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployRequest")
            .field("contract_name", &self.contract_name)
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("constructor_args", &self.constructor_args)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Successful deployment details.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub address: String,
    pub tx_hash: String,
    pub gas_used: Option<u64>,
}

/// Broadcasts a creation transaction.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: &DeployRequest, project_dir: &Path) -> ToolResult<DeployOutcome>;
}

/// One declared constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorParam {
    pub type_name: String,
    pub name: String,
}

/// Parse the constructor signature out of a source file.
pub fn parse_constructor_params(source: &str) -> Vec<ConstructorParam> {
    let re = Regex::new(r"constructor\s*\(([^)]*)\)").expect("static regex");
    let Some(caps) = re.captures(source) else {
        return Vec::new();
    };
    let params = caps[1].trim();
    if params.is_empty() {
        return Vec::new();
    }

    params
        .split(',')
        .filter_map(|param| {
            let parts: Vec<&str> = param.split_whitespace().collect();
            let type_name = parts.first()?;
            let name = parts.last().filter(|_| parts.len() > 1).unwrap_or(&"");
            Some(ConstructorParam {
                type_name: type_name.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

/// Validate provided arguments against the declared constructor before
/// anything is broadcast: count first, then per-type shape.
pub fn validate_constructor_args(
    params: &[ConstructorParam],
    args: &[String],
) -> Result<(), String> {
    if params.len() != args.len() {
        return Err(format!(
            "constructor expects {} arguments, got {}",
            params.len(),
            args.len()
        ));
    }

    for (param, arg) in params.iter().zip(args) {
        let base_type = param.type_name.trim_end_matches("[]");
        let valid = if param.type_name.ends_with("[]") {
            arg.starts_with('[') && arg.ends_with(']')
        } else if base_type == "address" {
            is_address(arg)
        } else if base_type.starts_with("uint") {
            !arg.is_empty() && arg.chars().all(|c| c.is_ascii_digit())
        } else if base_type.starts_with("int") {
            let digits = arg.strip_prefix('-').unwrap_or(arg);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        } else if base_type == "bool" {
            arg == "true" || arg == "false"
        } else if base_type.starts_with("bytes") {
            arg == "0x" || (arg.starts_with("0x") && arg[2..].chars().all(|c| c.is_ascii_hexdigit()))
        } else {
            // string and everything else: anything goes
            true
        };

        if !valid {
            return Err(format!(
                "argument '{arg}' is not a valid {} for parameter '{}'",
                param.type_name, param.name
            ));
        }
    }

    Ok(())
}

/// An address is 0x followed by exactly 40 hex characters.
fn is_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Classify deployment tool output into an error bucket.
pub fn classify_deploy_error(output: &str) -> DeployErrorKind {
    let lower = output.to_lowercase();
    if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
        DeployErrorKind::InsufficientFunds
    } else if lower.contains("out of gas")
        || lower.contains("gas required exceeds")
        || lower.contains("intrinsic gas")
    {
        DeployErrorKind::Gas
    } else if lower.contains("revert") {
        DeployErrorKind::Revert
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection refused")
        || lower.contains("error sending request")
        || lower.contains("rpc")
    {
        DeployErrorKind::Rpc
    } else {
        DeployErrorKind::Unknown
    }
}

/// Foundry-backed deployer using `forge create`.
pub struct ForgeDeployer;

impl ForgeDeployer {
    fn parse_created(stdout: &str) -> Option<DeployOutcome> {
        let address_re = Regex::new(r"Deployed to:\s*(0x[0-9a-fA-F]{40})").expect("static regex");
        let tx_re = Regex::new(r"Transaction hash:\s*(0x[0-9a-fA-F]{64})").expect("static regex");
        let gas_re = Regex::new(r"Gas used:\s*(\d+)").expect("static regex");

        let address = address_re.captures(stdout)?.get(1)?.as_str().to_string();
        let tx_hash = tx_re.captures(stdout)?.get(1)?.as_str().to_string();
        let gas_used = gas_re
            .captures(stdout)
            .and_then(|caps| caps.get(1)?.as_str().parse().ok());

        Some(DeployOutcome {
            address,
            tx_hash,
            gas_used,
        })
    }
}

#[async_trait]
impl Deployer for ForgeDeployer {
    async fn deploy(&self, request: &DeployRequest, project_dir: &Path) -> ToolResult<DeployOutcome> {
        let params = parse_constructor_params(&request.source);
        validate_constructor_args(&params, &request.constructor_args)
            .map_err(ToolError::ConstructorArgs)?;

        let target = format!(
            "src/{name}.sol:{name}",
            name = request.contract_name
        );
        let mut args: Vec<&str> = vec![
            "create",
            &target,
            "--rpc-url",
            &request.rpc_url,
            "--private-key",
            &request.private_key,
            "--broadcast",
        ];
        if !request.constructor_args.is_empty() {
            args.push("--constructor-args");
            for arg in &request.constructor_args {
                args.push(arg);
            }
        }

        let output = run_with_timeout(
            "forge",
            &args,
            Some(project_dir),
            Duration::from_secs(DEPLOY_TIMEOUT_SECS),
        )
        .await?;

        if !output.success() {
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            let kind = classify_deploy_error(&combined);
            tracing::warn!(?kind, "Deployment failed");
            return Err(ToolError::Deploy {
                kind,
                message: output.stderr.trim().to_string(),
            });
        }

        Self::parse_created(&output.stdout).ok_or_else(|| ToolError::BadOutput {
            tool: "forge".to_string(),
            reason: "deploy output missing address or transaction hash".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r"
        contract TestToken {
            constructor(string memory name_, string memory symbol_, uint256 supply_, address owner_) {}
        }
    ";

    #[test]
    fn test_parse_constructor_params() {
        let params = parse_constructor_params(SOURCE);
        assert_eq!(params.len(), 4);
        assert_eq!(params[0].type_name, "string");
        assert_eq!(params[2].type_name, "uint256");
        assert_eq!(params[3].name, "owner_");
    }

    #[test]
    fn test_no_constructor_means_no_params() {
        assert!(parse_constructor_params("contract T {}").is_empty());
    }

    #[test]
    fn test_validate_count_mismatch() {
        let params = parse_constructor_params(SOURCE);
        let err = validate_constructor_args(&params, &["TestToken".to_string()]).unwrap_err();
        assert!(err.contains("expects 4 arguments, got 1"));
    }

    #[test]
    fn test_validate_address_shape() {
        let params = parse_constructor_params(SOURCE);
        let mut args = vec![
            "TestToken".to_string(),
            "TEST".to_string(),
            "1000000".to_string(),
            "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb1".to_string(),
        ];
        assert!(validate_constructor_args(&params, &args).is_ok());

        // Too short: 39 hex characters.
        args[3] = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bE".to_string();
        assert!(validate_constructor_args(&params, &args).is_err());
    }

    #[test]
    fn test_validate_uint_rejects_non_numeric() {
        let params = parse_constructor_params(SOURCE);
        let args = vec![
            "TestToken".to_string(),
            "TEST".to_string(),
            "a-million".to_string(),
            "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb1".to_string(),
        ];
        let err = validate_constructor_args(&params, &args).unwrap_err();
        assert!(err.contains("uint256"));
    }

    #[test]
    fn test_classify_deploy_errors() {
        assert_eq!(
            classify_deploy_error("error: insufficient funds for gas * price + value"),
            DeployErrorKind::InsufficientFunds
        );
        assert_eq!(
            classify_deploy_error("Error: transaction ran out of gas"),
            DeployErrorKind::Gas
        );
        assert_eq!(
            classify_deploy_error("execution reverted: Ownable: caller is not the owner"),
            DeployErrorKind::Revert
        );
        assert_eq!(
            classify_deploy_error("error sending request for url"),
            DeployErrorKind::Rpc
        );
        assert_eq!(classify_deploy_error("???"), DeployErrorKind::Unknown);
    }

    #[test]
    fn test_parse_created_output() {
        let stdout = "Deployer: 0xabc\nDeployed to: 0x5FbDB2315678afecb367f032d93F642f64180aa3\nTransaction hash: 0x88f5b7a04d86c2a2e2e9a0b0d97f85ecfb9bd9a8a38d6e8a5a24a5c52f3f2d11\nGas used: 512345";
        let outcome = ForgeDeployer::parse_created(stdout).unwrap();
        assert_eq!(outcome.address, "0x5FbDB2315678afecb367f032d93F642f64180aa3");
        assert_eq!(outcome.gas_used, Some(512_345));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let request = DeployRequest {
            source: String::new(),
            contract_name: "T".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 1,
            constructor_args: vec![],
            private_key: "0xdeadbeef".to_string(),
        };
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("deadbeef"));
        assert!(rendered.contains("<redacted>"));
    }
}
