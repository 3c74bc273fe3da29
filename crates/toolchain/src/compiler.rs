//! Solidity compilation bridge.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{ToolError, ToolResult};
use crate::process::run_with_timeout;

/// Compile timeout.
const COMPILE_TIMEOUT_SECS: u64 = 60;

/// Successful compilation artifacts.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub bytecode: String,
    pub abi: Value,
    pub metadata: Value,
}

/// Compiles a contract source inside a scratch project.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        source: &str,
        contract_name: &str,
        project_dir: &Path,
    ) -> ToolResult<CompileOutput>;
}

/// Foundry-backed compiler: scaffolds a minimal project and runs
/// `forge build`.
pub struct ForgeCompiler;

impl ForgeCompiler {
    /// Lay out the scratch project: `src/<name>.sol` plus a `foundry.toml`
    /// if one is not already present.
    fn scaffold(source: &str, contract_name: &str, project_dir: &Path) -> ToolResult<()> {
        let src_dir = project_dir.join("src");
        std::fs::create_dir_all(&src_dir)?;
        std::fs::write(src_dir.join(format!("{contract_name}.sol")), source)?;

        let foundry_toml = project_dir.join("foundry.toml");
        if !foundry_toml.exists() {
            std::fs::write(
                &foundry_toml,
                "[profile.default]\nsrc = \"src\"\nout = \"out\"\nlibs = [\"lib\"]\n",
            )?;
        }
        Ok(())
    }

    /// Read the build artifact for the contract.
    fn read_artifact(contract_name: &str, project_dir: &Path) -> ToolResult<CompileOutput> {
        let artifact_path = project_dir
            .join("out")
            .join(format!("{contract_name}.sol"))
            .join(format!("{contract_name}.json"));

        let content = std::fs::read_to_string(&artifact_path)?;
        let artifact: Value = serde_json::from_str(&content).map_err(|e| ToolError::BadOutput {
            tool: "forge".to_string(),
            reason: format!("artifact parse: {e}"),
        })?;

        let bytecode = artifact
            .pointer("/bytecode/object")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::BadOutput {
                tool: "forge".to_string(),
                reason: "artifact missing bytecode.object".to_string(),
            })?
            .to_string();
        let abi = artifact.get("abi").cloned().unwrap_or(Value::Null);
        let metadata = artifact.get("metadata").cloned().unwrap_or(Value::Null);

        Ok(CompileOutput {
            bytecode,
            abi,
            metadata,
        })
    }
}

#[async_trait]
impl Compiler for ForgeCompiler {
    async fn compile(
        &self,
        source: &str,
        contract_name: &str,
        project_dir: &Path,
    ) -> ToolResult<CompileOutput> {
        Self::scaffold(source, contract_name, project_dir)?;

        let output = run_with_timeout(
            "forge",
            &["build"],
            Some(project_dir),
            Duration::from_secs(COMPILE_TIMEOUT_SECS),
        )
        .await?;

        if !output.success() {
            tracing::warn!(exit_code = output.exit_code, "Compilation failed");
            return Err(ToolError::CompilationFailed {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            });
        }

        tracing::info!(contract = contract_name, "Compilation succeeded");
        Self::read_artifact(contract_name, project_dir)
    }
}

/// Extract the primary contract name from a source file. Falls back to
/// "Contract" when nothing matches.
pub fn extract_contract_name(source: &str) -> String {
    let re = regex::Regex::new(r"(?m)^\s*(?:abstract\s+)?contract\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static regex");
    re.captures_iter(source)
        .last()
        .and_then(|caps| caps.get(1))
        .map_or_else(|| "Contract".to_string(), |m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_contract_name_last_wins() {
        let source = "contract Base {}\ncontract TestToken is Base {}";
        assert_eq!(extract_contract_name(source), "TestToken");
    }

    #[test]
    fn test_extract_contract_name_fallback() {
        assert_eq!(extract_contract_name("library Math {}"), "Contract");
    }

    #[test]
    fn test_scaffold_writes_source_and_config() {
        let dir = tempfile::tempdir().unwrap();
        ForgeCompiler::scaffold("contract T {}", "T", dir.path()).unwrap();
        assert!(dir.path().join("src/T.sol").exists());
        assert!(dir.path().join("foundry.toml").exists());
    }
}
