//! In-flight workflow state shared across stage runners.

use std::path::PathBuf;

use config::NetworkConfig;
use model::ErrorKind;
use serde_json::Value;
use toolchain::{AuditReport, CompileOutput, DeployOutcome, ResolutionOutcome};

use crate::options::RunOptions;

/// Outcome of one stage attempt, before it is recorded into the context.
#[derive(Debug)]
pub enum StageOutcome {
    Success { outputs: Value },
    Skipped { reason: String },
    Degraded { outputs: Value },
    Failed { kind: ErrorKind, message: String },
}

impl StageOutcome {
    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Mutable state threaded through the stage sequence. The workflow context
/// records what happened; this carries what the next stage needs.
pub struct WorkflowState {
    pub options: RunOptions,
    pub network: NetworkConfig,
    /// The generation prompt, possibly rewritten by repair.
    pub prompt: String,
    /// Retrieved context appended to the prompt, possibly rewritten.
    pub rag_context: String,
    /// Generated contract source.
    pub source: Option<String>,
    pub contract_name: Option<String>,
    pub compile: Option<CompileOutput>,
    pub deps: Option<ResolutionOutcome>,
    pub audit: Option<AuditReport>,
    pub deploy: Option<DeployOutcome>,
    /// Set when the audit vetoed deployment.
    pub deploy_vetoed: bool,
    /// Scratch project directory for this run.
    pub project_dir: PathBuf,
    /// Compilation has already been re-entered after dependency resolution.
    pub recompiled_after_deps: bool,
    /// Description of the most recent repair, recorded as the fix message
    /// when the repaired stage succeeds.
    pub last_repair: Option<String>,
}

impl WorkflowState {
    pub fn new(options: RunOptions, network: NetworkConfig, prompt: &str, project_dir: PathBuf) -> Self {
        Self {
            options,
            network,
            prompt: prompt.to_string(),
            rag_context: String::new(),
            source: None,
            contract_name: None,
            compile: None,
            deps: None,
            audit: None,
            deploy: None,
            deploy_vetoed: false,
            project_dir,
            recompiled_after_deps: false,
            last_repair: None,
        }
    }

    /// Whether dependency resolution changed the project since the last
    /// build.
    pub fn deps_changed(&self) -> bool {
        self.deps
            .as_ref()
            .is_some_and(|d| !d.installed.is_empty() || d.remappings_updated)
    }
}
