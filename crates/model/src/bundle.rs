//! Diagnostic bundle: the final JSON artifact that proves what happened.
//!
//! Every workflow persists exactly one bundle on termination, whatever path
//! it took to get there. The bundle is self-contained: stages with all
//! attempts, the full error history, retry counts, and enough system
//! information to reproduce the environment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::{ContractInfo, ErrorRecord, RagStatus, StageResult, WorkflowContext, WorkflowStatus};
use crate::errors::ModelResult;
use crate::fsutil;

/// Host and toolchain details captured at bundle time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// The persisted diagnostic document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBundle {
    pub workflow_id: String,
    pub user_prompt: String,
    pub system_info: SystemInfo,
    /// Tool name to reported version, e.g. `forge` or `slither`.
    pub tool_versions: BTreeMap<String, String>,
    pub stages: Vec<StageResult>,
    pub errors: Vec<ErrorRecord>,
    pub retry_attempts: BTreeMap<String, u32>,
    pub final_status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_info: Option<ContractInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_status: Option<RagStatus>,
    /// Generated contract source at time of bundling, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_snapshot: Option<String>,
}

/// Outcome of a bundle integrity check.
#[derive(Debug, Clone, Default)]
pub struct BundleValidation {
    pub issues: Vec<String>,
}

impl BundleValidation {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

impl DiagnosticBundle {
    /// Assemble a bundle from a finalized workflow context.
    pub fn from_context(
        context: &WorkflowContext,
        system_info: SystemInfo,
        tool_versions: BTreeMap<String, String>,
        source_snapshot: Option<String>,
    ) -> Self {
        Self {
            workflow_id: context.workflow_id.clone(),
            user_prompt: context.user_prompt.clone(),
            system_info,
            tool_versions,
            stages: context.stages.clone(),
            errors: context.error_history.clone(),
            retry_attempts: context.retry_attempts.clone(),
            final_status: context.status,
            contract_info: context.contract_info.clone(),
            rag_status: Some(context.rag_status.clone()),
            source_snapshot,
        }
    }

    /// Integrity check over a bundle.
    ///
    /// Parse-time typing already guarantees legal stage and status tags;
    /// this validates the cross-field invariants a consumer relies on.
    pub fn validate(&self, max_retries_per_stage: u32) -> BundleValidation {
        let mut validation = BundleValidation::default();

        if self.workflow_id.trim().is_empty() {
            validation.issues.push("workflow_id is empty".to_string());
        }
        if self.user_prompt.trim().is_empty() {
            validation.issues.push("user_prompt is empty".to_string());
        }
        if self.stages.is_empty() {
            validation.issues.push("no stage results recorded".to_string());
        }

        for (stage, count) in &self.retry_attempts {
            if *count > max_retries_per_stage {
                validation.issues.push(format!(
                    "retry count {count} for stage '{stage}' exceeds budget {max_retries_per_stage}"
                ));
            }
        }

        for window in self.stages.windows(2) {
            if window[1].started_at < window[0].started_at {
                validation.issues.push(format!(
                    "stage results out of execution order: '{}' started before '{}'",
                    window[1].stage, window[0].stage
                ));
                break;
            }
        }

        if self.final_status == WorkflowStatus::Running {
            validation
                .issues
                .push("bundle persisted while workflow still running".to_string());
        }

        validation
    }

    /// Persist the bundle atomically and return the path written.
    pub fn save(&self, contexts_dir: &Path) -> ModelResult<std::path::PathBuf> {
        let path = contexts_dir.join(format!("{}_diagnostics.json", self.workflow_id));
        fsutil::write_json_atomic(&path, self)?;
        tracing::info!(
            workflow_id = %self.workflow_id,
            path = %path.display(),
            "Persisted diagnostic bundle"
        );
        Ok(path)
    }

    pub fn load(path: &Path) -> ModelResult<Self> {
        fsutil::read_json(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Stage, StageStatus};
    use chrono::Utc;

    fn bundle_for(context: &mut WorkflowContext) -> DiagnosticBundle {
        context.finalize();
        DiagnosticBundle::from_context(
            context,
            SystemInfo {
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                hostname: None,
            },
            BTreeMap::new(),
            None,
        )
    }

    #[test]
    fn test_valid_bundle_passes() {
        let mut ctx = WorkflowContext::new("erc20 token");
        ctx.record_stage(StageResult::finished(
            Stage::Generation,
            StageStatus::Success,
            Utc::now(),
        ));
        let bundle = bundle_for(&mut ctx);
        assert!(bundle.validate(3).is_valid());
    }

    #[test]
    fn test_retry_overflow_flagged() {
        let mut ctx = WorkflowContext::new("erc20 token");
        ctx.record_stage(StageResult::finished(
            Stage::Generation,
            StageStatus::Success,
            Utc::now(),
        ));
        for _ in 0..5 {
            ctx.bump_retry(Stage::Generation);
        }
        let bundle = bundle_for(&mut ctx);
        let validation = bundle.validate(3);
        assert!(!validation.is_valid());
        assert!(validation.issues[0].contains("generation"));
    }

    #[test]
    fn test_running_status_flagged() {
        let ctx = WorkflowContext::new("erc20 token");
        let bundle = DiagnosticBundle::from_context(
            &ctx,
            SystemInfo::default(),
            BTreeMap::new(),
            None,
        );
        let validation = bundle.validate(3);
        assert!(validation
            .issues
            .iter()
            .any(|i| i.contains("still running")));
    }

    #[test]
    fn test_save_names_file_after_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = WorkflowContext::new("erc20 token");
        ctx.record_stage(StageResult::finished(
            Stage::Output,
            StageStatus::Success,
            Utc::now(),
        ));
        let bundle = bundle_for(&mut ctx);
        let path = bundle.save(dir.path()).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_diagnostics.json"));
        assert!(DiagnosticBundle::load(&path).is_ok());
    }
}
