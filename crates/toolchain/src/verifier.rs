//! Explorer verification bridge.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ToolResult;
use crate::process::run_with_timeout;

/// Verification timeout.
const VERIFY_TIMEOUT_SECS: u64 = 60;

/// A verification request.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub address: String,
    pub chain_id: u64,
    pub contract_name: String,
    pub explorer_url: String,
    pub constructor_args: Vec<String>,
}

/// Verification result. `verified == false` with details is a normal
/// outcome, not an error.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub details: String,
}

/// Submits sources to a block explorer. No internal retries.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, request: &VerifyRequest, project_dir: &Path) -> ToolResult<VerifyOutcome>;
}

/// Foundry-backed verifier using `forge verify-contract`.
pub struct ExplorerVerifier;

#[async_trait]
impl Verifier for ExplorerVerifier {
    async fn verify(&self, request: &VerifyRequest, project_dir: &Path) -> ToolResult<VerifyOutcome> {
        let target = format!(
            "src/{name}.sol:{name}",
            name = request.contract_name
        );
        let chain_id = request.chain_id.to_string();
        let verifier_url = format!("{}/api", request.explorer_url.trim_end_matches('/'));
        let joined_args = request.constructor_args.join(" ");

        let mut args: Vec<&str> = vec![
            "verify-contract",
            &request.address,
            &target,
            "--chain-id",
            &chain_id,
            "--verifier",
            "blockscout",
            "--verifier-url",
            &verifier_url,
            "--watch",
        ];
        if !request.constructor_args.is_empty() {
            args.push("--constructor-args");
            args.push(&joined_args);
        }

        let output = run_with_timeout(
            "forge",
            &args,
            Some(project_dir),
            Duration::from_secs(VERIFY_TIMEOUT_SECS),
        )
        .await?;

        let verified = output.success()
            && (output.stdout.contains("Contract successfully verified")
                || output.stdout.contains("already verified"));

        let details = if verified {
            format!(
                "{}/address/{}",
                request.explorer_url.trim_end_matches('/'),
                request.address
            )
        } else {
            let mut combined = output.stdout.trim().to_string();
            if !output.stderr.trim().is_empty() {
                combined.push('\n');
                combined.push_str(output.stderr.trim());
            }
            combined
        };

        if verified {
            tracing::info!(address = %request.address, "Contract verified on explorer");
        } else {
            tracing::warn!(address = %request.address, "Contract verification did not complete");
        }

        Ok(VerifyOutcome { verified, details })
    }
}
