//! Workflow context: the single source of truth for a workflow's state.
//!
//! The orchestrator exclusively owns a [`WorkflowContext`] for the lifetime
//! of a workflow and snapshots it to disk after every stage. Every other
//! component receives read-only views.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::ModelResult;
use crate::fsutil;
use crate::kind::ErrorKind;

/// Terminal (or in-flight) status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Success,
    CompletedWithErrors,
    Error,
}

/// The eight workflow stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    InputParsing,
    Generation,
    Compilation,
    DependencyResolution,
    Audit,
    Deployment,
    Verification,
    Output,
}

impl Stage {
    /// Stages in execution order.
    pub const SEQUENCE: [Stage; 8] = [
        Stage::InputParsing,
        Stage::Generation,
        Stage::Compilation,
        Stage::DependencyResolution,
        Stage::Audit,
        Stage::Deployment,
        Stage::Verification,
        Stage::Output,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputParsing => "input_parsing",
            Self::Generation => "generation",
            Self::Compilation => "compilation",
            Self::DependencyResolution => "dependency_resolution",
            Self::Audit => "audit",
            Self::Deployment => "deployment",
            Self::Verification => "verification",
            Self::Output => "output",
        }
    }

    /// A critical stage failing after all retries marks the whole workflow
    /// as failed. Everything else degrades.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::InputParsing | Self::Generation | Self::Compilation)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Error,
    Skipped,
    Degraded,
}

/// Which artifact registries retrieval may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RagScope {
    #[default]
    #[serde(rename = "official-only")]
    OfficialOnly,
    #[serde(rename = "community-allowed")]
    CommunityAllowed,
}

/// Outcome of the retrieval step feeding generation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagStatus {
    pub context_retrieved: bool,
    pub scope: RagScope,
    /// CIDs (or other identifiers) of the artifacts that contributed context.
    pub sources: Vec<String>,
}

/// Details of the generated contract, once known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    pub name: String,
    pub category: String,
    pub source_path: Option<PathBuf>,
    pub source_hash: Option<String>,
}

/// One classified error, appended to the append-only error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub error_type: ErrorKind,
    pub error_message: String,
    /// Set once a later attempt of the same stage succeeds.
    #[serde(default)]
    pub fix_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_message: Option<String>,
}

impl ErrorRecord {
    pub fn new(stage: Stage, error_type: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            timestamp: Utc::now(),
            error_type,
            error_message: message.into(),
            fix_successful: false,
            fix_message: None,
        }
    }
}

/// One attempt at one stage. Retried stages appear multiple times, each
/// attempt a distinct result, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub inputs_summary: Value,
    #[serde(default)]
    pub outputs_summary: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl StageResult {
    /// Build a result for an attempt that started at `started_at` and
    /// finished now.
    pub fn finished(stage: Stage, status: StageStatus, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            stage,
            status,
            started_at,
            finished_at,
            duration_ms,
            inputs_summary: Value::Null,
            outputs_summary: Value::Null,
            error: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs_summary = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs_summary = outputs;
        self
    }

    pub fn with_error(mut self, error: ErrorRecord) -> Self {
        self.error = Some(error);
        self
    }
}

/// A single workflow's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub workflow_id: String,
    pub user_prompt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: WorkflowStatus,
    pub critical_failure: bool,
    pub stages: Vec<StageResult>,
    pub error_history: Vec<ErrorRecord>,
    /// Attempt counts per stage name.
    #[serde(default)]
    pub retry_attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub rag_status: RagStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_info: Option<ContractInfo>,
    /// Stage names whose most recent attempt failed.
    #[serde(default)]
    pub failed_stages: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_bundle_path: Option<PathBuf>,
}

impl WorkflowContext {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            user_prompt: user_prompt.into(),
            created_at: now,
            updated_at: now,
            status: WorkflowStatus::Running,
            critical_failure: false,
            stages: Vec::new(),
            error_history: Vec::new(),
            retry_attempts: BTreeMap::new(),
            rag_status: RagStatus::default(),
            model_provider: None,
            contract_info: None,
            failed_stages: BTreeSet::new(),
            diagnostic_bundle_path: None,
        }
    }

    /// Append a stage attempt and refresh the failed-stage set.
    pub fn record_stage(&mut self, result: StageResult) {
        let name = result.stage.as_str().to_string();
        match result.status {
            StageStatus::Error => {
                self.failed_stages.insert(name);
            }
            StageStatus::Success | StageStatus::Degraded => {
                self.failed_stages.remove(&name);
            }
            StageStatus::Skipped => {}
        }
        self.stages.push(result);
        self.updated_at = Utc::now();
    }

    /// Append an error to the append-only history.
    pub fn record_error(&mut self, record: ErrorRecord) {
        self.error_history.push(record);
        self.updated_at = Utc::now();
    }

    /// Increment and return the attempt count for a stage.
    pub fn bump_retry(&mut self, stage: Stage) -> u32 {
        let count = self.retry_attempts.entry(stage.as_str().to_string()).or_insert(0);
        *count += 1;
        self.updated_at = Utc::now();
        *count
    }

    pub fn retry_count(&self, stage: Stage) -> u32 {
        self.retry_attempts.get(stage.as_str()).copied().unwrap_or(0)
    }

    /// Mark the most recent unresolved error of `stage` as fixed. Called when
    /// a retry of the same stage succeeds.
    pub fn mark_fix_successful(&mut self, stage: Stage, fix_message: impl Into<String>) {
        if let Some(record) = self
            .error_history
            .iter_mut()
            .rev()
            .find(|r| r.stage == stage && !r.fix_successful)
        {
            record.fix_successful = true;
            record.fix_message = Some(fix_message.into());
            self.updated_at = Utc::now();
        }
    }

    /// Whether the most recent attempt of `stage` ended in error.
    pub fn stage_failed(&self, stage: Stage) -> bool {
        self.failed_stages.contains(stage.as_str())
    }

    /// Status of the most recent attempt of `stage`, if it ran at all.
    pub fn last_stage_status(&self, stage: Stage) -> Option<StageStatus> {
        self.stages.iter().rev().find(|s| s.stage == stage).map(|s| s.status)
    }

    /// Derive the terminal status from recorded stage results.
    ///
    /// A failed critical stage yields `error` with `critical_failure` set;
    /// any other failure yields `completed_with_errors`. Skipped stages do
    /// not count against success.
    pub fn finalize(&mut self) {
        let critical_failed = self
            .failed_stages
            .iter()
            .any(|name| Stage::SEQUENCE.iter().any(|s| s.as_str() == name && s.is_critical()));

        if critical_failed {
            self.status = WorkflowStatus::Error;
            self.critical_failure = true;
        } else if self.failed_stages.is_empty() {
            self.status = WorkflowStatus::Success;
            self.critical_failure = false;
        } else {
            self.status = WorkflowStatus::CompletedWithErrors;
            self.critical_failure = false;
        }
        self.updated_at = Utc::now();
    }

    /// Path of the on-disk snapshot inside a `.workflow_contexts` directory.
    pub fn snapshot_path(&self, contexts_dir: &Path) -> PathBuf {
        contexts_dir.join(format!("{}.json", self.workflow_id))
    }

    /// Persist a snapshot atomically.
    pub fn save(&self, contexts_dir: &Path) -> ModelResult<PathBuf> {
        let path = self.snapshot_path(contexts_dir);
        fsutil::write_json_atomic(&path, self)?;
        tracing::debug!(workflow_id = %self.workflow_id, path = %path.display(), "Saved workflow context");
        Ok(path)
    }

    pub fn load(path: &Path) -> ModelResult<Self> {
        fsutil::read_json(path)
    }
}
