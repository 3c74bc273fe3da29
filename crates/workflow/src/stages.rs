//! Stage runners. Each runner catches every error its collaborators raise,
//! classifies it, and reports a [`StageOutcome`]; nothing propagates past
//! the stage boundary.

use serde_json::json;
use sha2::{Digest, Sha256};

use llm::{GenerateOptions, MessageBuilder};
use model::{ContractInfo, ErrorKind, Stage, WorkflowContext};
use repair::ContractType;
use toolchain::{DeployRequest, ToolError, VerifyRequest};

use crate::engine::Orchestrator;
use crate::state::{StageOutcome, WorkflowState};

/// Prompts beyond this length are rejected at input parsing.
const MAX_PROMPT_CHARS: usize = 1000;

/// Patterns that have no business inside a contract description.
const DANGEROUS_PATTERNS: &[&str] = &["rm -rf", "sudo ", "eval(", "exec(", "system("];

/// Environment variable holding the deployer key. The key is read here,
/// handed to the deployer, and never serialized anywhere.
const DEPLOYER_KEY_ENV: &str = "DEPLOYER_PRIVATE_KEY";

impl Orchestrator {
    /// Dispatch one stage attempt.
    pub(crate) async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut WorkflowContext,
        state: &mut WorkflowState,
    ) -> StageOutcome {
        match stage {
            Stage::InputParsing => self.stage_input_parsing(ctx, state).await,
            Stage::Generation => self.stage_generation(ctx, state).await,
            Stage::Compilation => self.stage_compilation(state).await,
            Stage::DependencyResolution => self.stage_dependency_resolution(state).await,
            Stage::Audit => self.stage_audit(state).await,
            Stage::Deployment => self.stage_deployment(state).await,
            Stage::Verification => self.stage_verification(state).await,
            // Output is driven directly by the engine.
            Stage::Output => StageOutcome::Success { outputs: json!({}) },
        }
    }

    /// Validate the prompt, classify it, and retrieve generation context.
    async fn stage_input_parsing(
        &self,
        ctx: &mut WorkflowContext,
        state: &mut WorkflowState,
    ) -> StageOutcome {
        let prompt = state.prompt.trim().to_string();
        if prompt.is_empty() {
            return StageOutcome::failed(ErrorKind::Unknown, "prompt cannot be empty");
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return StageOutcome::failed(
                ErrorKind::Unknown,
                format!("prompt too long (max {MAX_PROMPT_CHARS} characters)"),
            );
        }
        let lower = prompt.to_lowercase();
        if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| lower.contains(*p)) {
            return StageOutcome::failed(
                ErrorKind::Unknown,
                format!("potentially dangerous content detected: {pattern}"),
            );
        }

        let contract_type = ContractType::classify(&prompt);
        ctx.contract_info = Some(ContractInfo {
            name: String::new(),
            category: contract_type.as_str().to_string(),
            source_path: None,
            source_hash: None,
        });

        // Retrieval is best-effort: a missing or failing store degrades to
        // an empty context, never a failed stage.
        if let Some(retriever) = &self.retriever {
            let query = format!("{} {}", contract_type.as_str(), prompt);
            let retrieved = retriever
                .retrieve(&query, state.options.rag_scope, 5)
                .await;
            state.rag_context = retrieved.context;
            ctx.rag_status = retrieved.status;
        } else {
            ctx.rag_status.scope = state.options.rag_scope;
        }

        StageOutcome::Success {
            outputs: json!({
                "contract_type": contract_type.as_str(),
                "context_retrieved": ctx.rag_status.context_retrieved,
                "sources": ctx.rag_status.sources.clone(),
            }),
        }
    }

    /// Call the model router and extract the generated source.
    async fn stage_generation(
        &self,
        ctx: &mut WorkflowContext,
        state: &mut WorkflowState,
    ) -> StageOutcome {
        let mut user_prompt = state.prompt.clone();
        if !state.rag_context.trim().is_empty() {
            user_prompt.push_str("\n\nReference context from the artifact store:\n");
            user_prompt.push_str(&state.rag_context);
        }

        let messages = MessageBuilder::new()
            .system(
                "You are an expert Solidity engineer. Generate a complete, production-ready \
                 smart contract for the user's request. Respond with a single Solidity source \
                 file in a ```solidity code block, and nothing else.",
            )
            .user(user_prompt)
            .build();

        let options = GenerateOptions {
            temperature: Some(0.2),
            max_tokens: Some(4096),
            stop_sequences: None,
        };

        let routed = match self.router.generate(&messages, &options).await {
            Ok(routed) => routed,
            Err(e) => return StageOutcome::failed(e.kind(), e.to_string()),
        };
        ctx.model_provider = Some(routed.model.clone());

        let Some(source) = extract_solidity(&routed.response.text) else {
            return StageOutcome::failed(
                ErrorKind::Unknown,
                "generation produced no contract source",
            );
        };

        let contract_name = toolchain::compiler::extract_contract_name(&source);
        let source_hash = hex::encode(Sha256::digest(source.as_bytes()));

        // Keep a copy under artifacts/ for the caller; failure here is not
        // a stage failure.
        let artifacts_dir = self.workspace_artifacts_dir();
        let artifact_path = artifacts_dir.join(format!("{}_{contract_name}.sol", ctx.workflow_id));
        if let Err(e) = std::fs::create_dir_all(&artifacts_dir)
            .and_then(|()| std::fs::write(&artifact_path, &source))
        {
            tracing::warn!(error = %e, "Failed to write generated source artifact");
        }

        if let Some(info) = &mut ctx.contract_info {
            info.name = contract_name.clone();
            info.source_path = Some(artifact_path);
            info.source_hash = Some(source_hash);
        }

        let source_chars = source.chars().count();
        state.source = Some(source);
        state.contract_name = Some(contract_name.clone());

        StageOutcome::Success {
            outputs: json!({
                "model": routed.model,
                "contract_name": contract_name,
                "source_chars": source_chars,
                "tokens": routed.response.usage.total_tokens,
            }),
        }
    }

    /// Compile inside the scratch project.
    async fn stage_compilation(&self, state: &mut WorkflowState) -> StageOutcome {
        let Some(source) = state.source.clone() else {
            return StageOutcome::failed(
                ErrorKind::CompilationError,
                "no generated source to compile",
            );
        };
        let contract_name = state
            .contract_name
            .clone()
            .unwrap_or_else(|| "Contract".to_string());

        match self
            .compiler
            .compile(&source, &contract_name, &state.project_dir)
            .await
        {
            Ok(output) => {
                let bytecode_len = output.bytecode.len();
                state.compile = Some(output);
                StageOutcome::Success {
                    outputs: json!({
                        "contract_name": contract_name,
                        "bytecode_len": bytecode_len,
                    }),
                }
            }
            Err(ToolError::CompilationFailed {
                stdout,
                stderr,
                exit_code,
            }) => {
                let combined = format!("{stdout}\n{stderr}");
                let kind = classify_compiler_error(&combined);
                StageOutcome::failed(
                    kind,
                    format!("compilation failed (exit {exit_code}): {}", stderr.trim()),
                )
            }
            Err(e) => StageOutcome::failed(e.kind(), e.to_string()),
        }
    }

    /// Parse imports, install packages, refresh remappings.
    async fn stage_dependency_resolution(&self, state: &mut WorkflowState) -> StageOutcome {
        let Some(source) = state.source.clone() else {
            return StageOutcome::Skipped {
                reason: "no source to resolve dependencies for".to_string(),
            };
        };

        match self.resolver.resolve(&source, &state.project_dir).await {
            Ok(outcome) => {
                let summary = json!({
                    "dependencies": outcome
                        .dependencies
                        .iter()
                        .map(|d| format!("{}@{}", d.package, d.version))
                        .collect::<Vec<_>>(),
                    "installed": outcome.installed.clone(),
                    "remappings_updated": outcome.remappings_updated,
                });
                state.deps = Some(outcome);
                StageOutcome::Success { outputs: summary }
            }
            Err(e) => StageOutcome::failed(e.kind(), e.to_string()),
        }
    }

    /// Run static analysis; high or critical findings veto deployment.
    async fn stage_audit(&self, state: &mut WorkflowState) -> StageOutcome {
        let Some(source) = state.source.clone() else {
            return StageOutcome::Skipped {
                reason: "no source to audit".to_string(),
            };
        };

        match self.auditor.audit(&source, &state.project_dir).await {
            Ok(report) => {
                let vetoed = report.severity.blocks_deployment() && !state.options.allow_insecure;
                if vetoed {
                    tracing::warn!(
                        severity = report.severity.as_str(),
                        "Audit vetoed deployment (pass --allow-insecure to override)"
                    );
                    state.deploy_vetoed = true;
                }
                let outputs = json!({
                    "severity": report.severity.as_str(),
                    "findings": report.findings.len(),
                    "tool": report.tool.clone(),
                    "deployment_vetoed": vetoed,
                });
                state.audit = Some(report);
                StageOutcome::Success { outputs }
            }
            Err(e) => StageOutcome::failed(e.kind(), e.to_string()),
        }
    }

    /// Broadcast the creation transaction, unless skipped or vetoed.
    async fn stage_deployment(&self, state: &mut WorkflowState) -> StageOutcome {
        if state.options.test_only {
            return StageOutcome::Skipped {
                reason: "test_only".to_string(),
            };
        }
        if state.deploy_vetoed {
            return StageOutcome::Skipped {
                reason: "vetoed by audit findings".to_string(),
            };
        }
        let (Some(source), Some(contract_name)) =
            (state.source.clone(), state.contract_name.clone())
        else {
            return StageOutcome::Skipped {
                reason: "nothing to deploy".to_string(),
            };
        };

        let Ok(private_key) = std::env::var(DEPLOYER_KEY_ENV) else {
            return StageOutcome::failed(
                ErrorKind::Auth,
                format!("{DEPLOYER_KEY_ENV} not set; cannot sign the deployment"),
            );
        };

        let request = DeployRequest {
            source,
            contract_name: contract_name.clone(),
            rpc_url: state.network.rpc_url.clone(),
            chain_id: state.network.chain_id,
            constructor_args: Vec::new(),
            private_key,
        };

        match self.deployer.deploy(&request, &state.project_dir).await {
            Ok(outcome) => {
                let outputs = json!({
                    "contract_name": contract_name,
                    "address": outcome.address.clone(),
                    "tx_hash": outcome.tx_hash.clone(),
                    "gas_used": outcome.gas_used,
                    "chain_id": state.network.chain_id,
                });
                state.deploy = Some(outcome);
                StageOutcome::Success { outputs }
            }
            Err(e) => StageOutcome::failed(e.kind(), e.to_string()),
        }
    }

    /// Submit sources to the explorer after a successful deployment.
    async fn stage_verification(&self, state: &mut WorkflowState) -> StageOutcome {
        if state.options.test_only {
            return StageOutcome::Skipped {
                reason: "test_only".to_string(),
            };
        }
        let Some(deploy) = &state.deploy else {
            return StageOutcome::Skipped {
                reason: "no successful deployment to verify".to_string(),
            };
        };
        if !state.options.auto_verification {
            return StageOutcome::Skipped {
                reason: "auto_verification disabled".to_string(),
            };
        }

        let request = VerifyRequest {
            address: deploy.address.clone(),
            chain_id: state.network.chain_id,
            contract_name: state
                .contract_name
                .clone()
                .unwrap_or_else(|| "Contract".to_string()),
            explorer_url: state.network.explorer_url.clone(),
            constructor_args: Vec::new(),
        };

        match self.verifier.verify(&request, &state.project_dir).await {
            Ok(outcome) if outcome.verified => StageOutcome::Success {
                outputs: json!({ "verified": true, "details": outcome.details }),
            },
            Ok(outcome) => StageOutcome::Degraded {
                outputs: json!({ "verified": false, "details": outcome.details }),
            },
            Err(e) => StageOutcome::failed(e.kind(), e.to_string()),
        }
    }

    fn workspace_artifacts_dir(&self) -> std::path::PathBuf {
        self.config_workspace().join("artifacts/workflows")
    }
}

/// Classify compiler output into the error taxonomy.
///
/// The pattern table covers the generic phrasing; solc's literal messages
/// need a few extra checks (it says "Source file requires different
/// compiler version" rather than anything containing "pragma missing").
pub(crate) fn classify_compiler_error(output: &str) -> ErrorKind {
    if let Some(kind) = repair::detect_error_pattern(output) {
        return kind;
    }
    let lower = output.to_lowercase();
    if lower.contains("requires different compiler version")
        || lower.contains("pragma solidity")
        || lower.contains("no pragma")
    {
        ErrorKind::MissingPragma
    } else if lower.contains("shadow") {
        ErrorKind::VariableShadowing
    } else if lower.contains("not found") && lower.contains("import") {
        ErrorKind::MissingImport
    } else if lower.contains("file not found") || lower.contains("source not found") {
        ErrorKind::MissingImport
    } else {
        ErrorKind::CompilationError
    }
}

/// Pull a Solidity source file out of a model response.
pub(crate) fn extract_solidity(text: &str) -> Option<String> {
    let fenced = ["```solidity", "```sol", "```"]
        .iter()
        .find_map(|fence| {
            let start = text.find(fence)? + fence.len();
            let rest = &text[start..];
            let end = rest.find("```")?;
            Some(rest[..end].trim().to_string())
        });

    let candidate = match fenced {
        Some(block) if block.contains("contract") || block.contains("library") => block,
        _ => {
            let trimmed = text.trim();
            if trimmed.contains("contract") && trimmed.contains('{') {
                trimmed.to_string()
            } else {
                return None;
            }
        }
    };

    if candidate.is_empty() {
        None
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_literal_solc_version_message() {
        let kind = classify_compiler_error(
            "Error: Source file requires different compiler version (current compiler is 0.8.24)",
        );
        assert_eq!(kind, ErrorKind::MissingPragma);
    }

    #[test]
    fn test_classify_shadowing() {
        let kind = classify_compiler_error(
            "Warning: This declaration shadows an existing declaration.",
        );
        assert_eq!(kind, ErrorKind::VariableShadowing);
    }

    #[test]
    fn test_classify_unmatched_is_compilation_error() {
        assert_eq!(
            classify_compiler_error("Error: expected ';' but got '}'"),
            ErrorKind::CompilationError
        );
    }

    #[test]
    fn test_extract_solidity_from_fence() {
        let text = "Here you go:\n```solidity\npragma solidity ^0.8.24;\ncontract T {}\n```\nEnjoy.";
        let source = extract_solidity(text).unwrap();
        assert!(source.starts_with("pragma solidity"));
        assert!(source.ends_with('}'));
    }

    #[test]
    fn test_extract_solidity_bare_source() {
        let text = "pragma solidity ^0.8.24;\ncontract T { uint256 x; }";
        assert!(extract_solidity(text).is_some());
    }

    #[test]
    fn test_extract_solidity_rejects_prose() {
        assert!(extract_solidity("I cannot help with that.").is_none());
    }
}
