//! Persistent agent memory over past workflow outcomes.
//!
//! Memory is bounded: beyond the configured cap the oldest entries are
//! evicted. A single process-wide instance owns all writes; readers get
//! cloned snapshots. Persistence failures are logged, never raised —
//! memory is an accelerant, not a dependency.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use model::{fsutil, ErrorKind, Stage, WorkflowContext, WorkflowStatus};

/// Default retention cap.
const DEFAULT_MAX_ENTRIES: usize = 100;

/// Stored prompts are truncated to this many characters.
const PROMPT_TRUNCATE_CHARS: usize = 200;

/// Minimum keyword overlap for prompt similarity hits.
const SIMILARITY_THRESHOLD: f64 = 0.3;

/// Broad contract classification derived from prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "ERC20")]
    Erc20,
    #[serde(rename = "ERC721")]
    Erc721,
    DeFi,
    #[serde(rename = "DAO")]
    Dao,
    Custom,
}

impl ContractType {
    /// Keyword classification, mirroring the repair pattern table.
    pub fn classify(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        if lower.contains("erc20") || lower.contains("token") {
            Self::Erc20
        } else if lower.contains("erc721") || lower.contains("nft") {
            Self::Erc721
        } else if lower.contains("defi") || lower.contains("dex") || lower.contains("swap") {
            Self::DeFi
        } else if lower.contains("dao") || lower.contains("governance") {
            Self::Dao
        } else {
            Self::Custom
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Erc20 => "ERC20",
            Self::Erc721 => "ERC721",
            Self::DeFi => "DeFi",
            Self::Dao => "DAO",
            Self::Custom => "Custom",
        }
    }
}

/// A fix that demonstrably worked in a past workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessfulFix {
    pub error_type: ErrorKind,
    pub stage: Stage,
    pub fix_message: String,
}

/// Distilled record of one past workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub workflow_id: String,
    /// First 200 characters of the user prompt.
    pub user_prompt: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_patterns: Vec<ErrorKind>,
    pub successful_fixes: Vec<SuccessfulFix>,
    pub contract_type: ContractType,
    #[serde(default)]
    pub rag_context_used: bool,
    #[serde(default)]
    pub model_provider: Option<String>,
}

/// Persisted document layout.
#[derive(Debug, Serialize, Deserialize, Default)]
struct MemoryFile {
    version: String,
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: Vec<MemoryEntry>,
}

/// Aggregate statistics over stored memory.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatistics {
    pub total_entries: usize,
    pub success_rate: f64,
    /// Most common error tags, capped at ten.
    pub common_error_types: BTreeMap<String, usize>,
    /// Most common contract types, capped at ten.
    pub common_contract_types: BTreeMap<String, usize>,
}

/// Bounded, persistent store of past workflow outcomes.
pub struct AgentMemory {
    path: PathBuf,
    max_entries: usize,
    entries: Mutex<Vec<MemoryEntry>>,
}

impl AgentMemory {
    /// Open the memory backed by `<contexts_dir>/agent_memory.json`.
    pub fn open(contexts_dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(contexts_dir, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(contexts_dir: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = contexts_dir.into().join("agent_memory.json");
        let entries = match fsutil::read_json_or_default::<MemoryFile>(&path) {
            Ok(file) => file.entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load agent memory; starting fresh");
                Vec::new()
            }
        };
        tracing::info!(entries = entries.len(), "Loaded agent memory");
        Self {
            path,
            max_entries,
            entries: Mutex::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distill a finished workflow into memory and persist.
    pub fn add(&self, context: &WorkflowContext) {
        let mut error_patterns: Vec<ErrorKind> = Vec::new();
        for record in &context.error_history {
            if record.error_type != ErrorKind::Unknown
                && !error_patterns.contains(&record.error_type)
            {
                error_patterns.push(record.error_type.clone());
            }
            // Key phrases in the raw message add tags classification missed.
            let lower = record.error_message.to_lowercase();
            for derived in [
                (lower.contains("pragma"), ErrorKind::MissingPragma),
                (
                    lower.contains("import") && lower.contains("not found"),
                    ErrorKind::MissingImport,
                ),
                (lower.contains("shadow"), ErrorKind::VariableShadowing),
            ] {
                if derived.0 && !error_patterns.contains(&derived.1) {
                    error_patterns.push(derived.1);
                }
            }
        }

        let successful_fixes: Vec<SuccessfulFix> = context
            .error_history
            .iter()
            .filter(|r| r.fix_successful)
            .map(|r| SuccessfulFix {
                error_type: r.error_type.clone(),
                stage: r.stage,
                fix_message: r.fix_message.clone().unwrap_or_default(),
            })
            .collect();

        let contract_type = context
            .contract_info
            .as_ref()
            .map(|info| ContractType::classify(&info.category))
            .unwrap_or_else(|| ContractType::classify(&context.user_prompt));

        let entry = MemoryEntry {
            workflow_id: context.workflow_id.clone(),
            user_prompt: context
                .user_prompt
                .chars()
                .take(PROMPT_TRUNCATE_CHARS)
                .collect(),
            timestamp: context.created_at,
            success: context.status == WorkflowStatus::Success,
            error_patterns,
            successful_fixes,
            contract_type,
            rag_context_used: context.rag_status.context_retrieved,
            model_provider: context.model_provider.clone(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.push(entry);
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(..overflow);
        }
        self.persist(&entries);
        tracing::debug!(workflow_id = %context.workflow_id, "Added workflow to agent memory");
    }

    /// Entries that saw `error_type` in `stage` and carry a fix that
    /// worked, most recent first.
    pub fn query_similar_errors(
        &self,
        error_type: &ErrorKind,
        stage: Stage,
        limit: usize,
    ) -> Vec<MemoryEntry> {
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .iter()
            .rev()
            .filter(|entry| {
                entry.error_patterns.contains(error_type)
                    && entry
                        .successful_fixes
                        .iter()
                        .any(|f| &f.error_type == error_type && f.stage == stage)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Entries whose stored prompt shares at least 30% of keywords with
    /// `prompt`, by descending similarity, ties broken by recency.
    pub fn query_similar_prompts(&self, prompt: &str, limit: usize) -> Vec<MemoryEntry> {
        let query_keywords: std::collections::BTreeSet<String> = prompt
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut scored: Vec<(f64, &MemoryEntry)> = entries
            .iter()
            .rev()
            .filter_map(|entry| {
                let entry_keywords: std::collections::BTreeSet<String> = entry
                    .user_prompt
                    .to_lowercase()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                let intersection = query_keywords.intersection(&entry_keywords).count();
                let union = query_keywords.union(&entry_keywords).count();
                if union == 0 {
                    return None;
                }
                let similarity = intersection as f64 / union as f64;
                (similarity >= SIMILARITY_THRESHOLD).then_some((similarity, entry))
            })
            .collect();

        // Stable sort: equal similarities keep the recency order built above.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// All fixes that worked for `(error_type, stage)`, most recent first.
    pub fn successful_fixes_for(&self, error_type: &ErrorKind, stage: Stage) -> Vec<SuccessfulFix> {
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .iter()
            .rev()
            .flat_map(|entry| entry.successful_fixes.iter())
            .filter(|f| &f.error_type == error_type && f.stage == stage)
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> MemoryStatistics {
        let entries = self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if entries.is_empty() {
            return MemoryStatistics {
                total_entries: 0,
                success_rate: 0.0,
                common_error_types: BTreeMap::new(),
                common_contract_types: BTreeMap::new(),
            };
        }

        let successes = entries.iter().filter(|e| e.success).count();

        let mut error_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut type_counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in entries.iter() {
            for pattern in &entry.error_patterns {
                *error_counts.entry(pattern.as_str().to_string()).or_insert(0) += 1;
            }
            *type_counts
                .entry(entry.contract_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        MemoryStatistics {
            total_entries: entries.len(),
            success_rate: successes as f64 / entries.len() as f64,
            common_error_types: top_n(error_counts, 10),
            common_contract_types: top_n(type_counts, 10),
        }
    }

    fn persist(&self, entries: &[MemoryEntry]) {
        let file = MemoryFile {
            version: "1.0".to_string(),
            last_updated: Some(Utc::now()),
            entries: entries.to_vec(),
        };
        if let Err(e) = fsutil::write_json_atomic(&self.path, &file) {
            tracing::warn!(error = %e, "Failed to save agent memory");
        }
    }
}

fn top_n(counts: BTreeMap<String, usize>, n: usize) -> BTreeMap<String, usize> {
    let mut pairs: Vec<(String, usize)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs.into_iter().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{ErrorRecord, StageResult, StageStatus};

    fn finished_context(prompt: &str, success: bool) -> WorkflowContext {
        let mut ctx = WorkflowContext::new(prompt);
        ctx.record_stage(StageResult::finished(
            Stage::Generation,
            if success {
                StageStatus::Success
            } else {
                StageStatus::Error
            },
            Utc::now(),
        ));
        ctx.finalize();
        ctx
    }

    fn context_with_fix(prompt: &str) -> WorkflowContext {
        let mut ctx = finished_context(prompt, true);
        let mut record = ErrorRecord::new(
            Stage::Generation,
            ErrorKind::MissingPragma,
            "pragma missing from generated source",
        );
        record.fix_successful = true;
        record.fix_message = Some("appended pragma requirement".to_string());
        ctx.record_error(record);
        ctx
    }

    #[test]
    fn test_contract_type_classification() {
        assert_eq!(ContractType::classify("an erc20 token"), ContractType::Erc20);
        assert_eq!(ContractType::classify("nft collection"), ContractType::Erc721);
        assert_eq!(ContractType::classify("dex swap pool"), ContractType::DeFi);
        assert_eq!(ContractType::classify("governance voting"), ContractType::Dao);
        assert_eq!(ContractType::classify("something else"), ContractType::Custom);
    }

    #[test]
    fn test_bounded_retention_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::with_capacity(dir.path(), 3);
        for i in 0..5 {
            memory.add(&finished_context(&format!("prompt {i}"), true));
        }
        assert_eq!(memory.len(), 3);
        // The survivors are the three most recent.
        let recent = memory.query_similar_prompts("prompt 4", 10);
        assert!(!recent.is_empty());
    }

    #[test]
    fn test_query_similar_errors_requires_matching_fix() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::open(dir.path());

        // Entry with the error but no successful fix.
        let mut unfixed = finished_context("token one", false);
        unfixed.record_error(ErrorRecord::new(
            Stage::Generation,
            ErrorKind::MissingPragma,
            "pragma missing",
        ));
        memory.add(&unfixed);
        memory.add(&context_with_fix("token two"));

        let hits = memory.query_similar_errors(&ErrorKind::MissingPragma, Stage::Generation, 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].user_prompt.contains("token two"));
    }

    #[test]
    fn test_prompt_similarity_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::open(dir.path());
        memory.add(&finished_context("erc20 token named gold supply fixed", true));
        memory.add(&finished_context("completely unrelated lending protocol", true));

        let hits = memory.query_similar_prompts("erc20 token named silver supply fixed", 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].user_prompt.contains("gold"));
    }

    #[test]
    fn test_successful_fixes_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::open(dir.path());
        memory.add(&context_with_fix("token"));

        let fixes = memory.successful_fixes_for(&ErrorKind::MissingPragma, Stage::Generation);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].fix_message, "appended pragma requirement");

        assert!(memory
            .successful_fixes_for(&ErrorKind::MissingPragma, Stage::Compilation)
            .is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let memory = AgentMemory::open(dir.path());
            memory.add(&context_with_fix("persisted token"));
        }
        let reopened = AgentMemory::open(dir.path());
        assert_eq!(reopened.len(), 1);
        let fixes = reopened.successful_fixes_for(&ErrorKind::MissingPragma, Stage::Generation);
        assert_eq!(fixes.len(), 1);
    }

    #[test]
    fn test_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let memory = AgentMemory::open(dir.path());
        memory.add(&finished_context("erc20 token a", true));
        memory.add(&finished_context("erc20 token b", false));

        let stats = memory.statistics();
        assert_eq!(stats.total_entries, 2);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.common_contract_types.get("ERC20"), Some(&2));
    }
}
