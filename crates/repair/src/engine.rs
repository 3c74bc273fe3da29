//! The repair engine: memory-directed fixes, pattern rewrites, LLM rephrase.

use std::sync::Arc;

use llm::{GenerateOptions, LlmMessage, ModelRouter};
use model::{ErrorKind, Stage};

use crate::memory::AgentMemory;
use crate::patterns;

/// Result of a repair attempt. When `repaired` is false the inputs are
/// returned unchanged.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub prompt: String,
    pub context: String,
    pub repaired: bool,
    /// Description of the applied fix, for the error history.
    pub description: Option<String>,
}

impl RepairOutcome {
    fn unchanged(prompt: &str, context: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            context: context.to_string(),
            repaired: false,
            description: None,
        }
    }
}

/// Rewrites generation inputs in response to classified errors.
///
/// Repair sources are consulted in priority order: fixes that worked for
/// the same `(error type, stage)` in past workflows, then the pattern
/// table, then (separately, at the caller's discretion) an LLM rephrase.
pub struct RepairEngine {
    memory: Arc<AgentMemory>,
}

impl RepairEngine {
    pub fn new(memory: Arc<AgentMemory>) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &Arc<AgentMemory> {
        &self.memory
    }

    /// Classify an error message against the pattern table.
    pub fn detect_error_pattern(&self, error_message: &str) -> Option<ErrorKind> {
        patterns::detect_error_pattern(error_message)
    }

    /// Repair generation inputs based on an error.
    pub fn repair(
        &self,
        prompt: &str,
        context: &str,
        error_message: &str,
        error_type: Option<&ErrorKind>,
    ) -> RepairOutcome {
        let detected = patterns::detect_error_pattern(error_message);
        let kind = error_type.cloned().or(detected);

        // Past fixes for this exact error type take priority; prompt
        // repairs overwhelmingly apply to the generation stage.
        if let Some(kind) = &kind {
            let fixes = self.memory.successful_fixes_for(kind, Stage::Generation);
            if !fixes.is_empty() {
                let mut hints: Vec<String> = Vec::new();
                for fix in fixes.iter() {
                    if !fix.fix_message.is_empty() && !hints.contains(&fix.fix_message) {
                        hints.push(fix.fix_message.clone());
                    }
                    if hints.len() >= 3 {
                        break;
                    }
                }
                if !hints.is_empty() {
                    tracing::info!(error_type = %kind, "Using fix strategy from agent memory");
                    let hint_block = hints
                        .iter()
                        .map(|h| format!("- {h}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    return RepairOutcome {
                        prompt: format!(
                            "{prompt}\n\nApply the following adjustments that resolved \
                             similar failures before:\n{hint_block}"
                        ),
                        context: context.to_string(),
                        repaired: true,
                        description: Some(format!("reused fix from memory for {kind}")),
                    };
                }
            }
        }

        // Message-based detection first; when that misses but the caller
        // classified the error from a richer signal (compiler output, tool
        // exit data), fall back to the rewriter for that kind.
        let rewrite = patterns::apply_pattern(error_message, prompt, context).or_else(|| {
            error_type.and_then(|kind| patterns::apply_kind(kind, prompt, context))
        });

        match rewrite {
            Some(rewrite) => RepairOutcome {
                prompt: rewrite.prompt,
                context: rewrite.context,
                repaired: true,
                description: Some(rewrite.description),
            },
            None => RepairOutcome::unchanged(prompt, context),
        }
    }

    /// Ask a model to restate the prompt more precisely. Invoked only when
    /// pattern repair declined. A response that does not parse into a
    /// usable rewrite leaves the inputs unchanged.
    pub async fn repair_with_llm(
        &self,
        prompt: &str,
        context: &str,
        error_message: &str,
        router: &ModelRouter,
    ) -> RepairOutcome {
        let meta_prompt = format!(
            "The following contract generation prompt failed with error: {error_message}\n\n\
             Original prompt: {prompt}\n\n\
             Rephrase the prompt to be more explicit and clear, ensuring:\n\
             1. All required Solidity version and pragma statements are specified\n\
             2. The contract type is clearly identified\n\
             3. All required imports and dependencies are mentioned\n\
             4. Technical requirements are specific and unambiguous\n\n\
             Rephrased prompt:"
        );

        let options = GenerateOptions {
            temperature: Some(0.3),
            max_tokens: Some(800),
            stop_sequences: None,
        };

        match router
            .generate(&[LlmMessage::user(meta_prompt)], &options)
            .await
        {
            Ok(routed) => match parse_rephrased(&routed.response.text) {
                Some(rephrased) => {
                    tracing::info!(model = %routed.model, "Used LLM to rephrase prompt");
                    RepairOutcome {
                        prompt: rephrased,
                        context: context.to_string(),
                        repaired: true,
                        description: Some("LLM rephrased the prompt".to_string()),
                    }
                }
                None => {
                    tracing::debug!("LLM rephrase produced no usable rewrite");
                    RepairOutcome::unchanged(prompt, context)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "LLM-based prompt repair failed");
                RepairOutcome::unchanged(prompt, context)
            }
        }
    }
}

/// Extract the rewritten prompt from a rephrase response.
///
/// Models tend to echo the "Rephrased prompt:" header; anything after its
/// last occurrence is the rewrite. Very short output is discarded as noise.
fn parse_rephrased(text: &str) -> Option<String> {
    let body = match text.rfind("Rephrased prompt:") {
        Some(idx) => &text[idx + "Rephrased prompt:".len()..],
        None => text,
    };
    let trimmed = body.trim().trim_matches('"').trim();
    if trimmed.len() < 20 {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::{ErrorRecord, StageResult, StageStatus, WorkflowContext};

    fn engine_with_memory_fix() -> (tempfile::TempDir, RepairEngine) {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(AgentMemory::open(dir.path()));

        let mut ctx = WorkflowContext::new("erc20 with history");
        ctx.record_stage(StageResult::finished(
            Stage::Generation,
            StageStatus::Success,
            Utc::now(),
        ));
        let mut record = ErrorRecord::new(
            Stage::Generation,
            ErrorKind::MissingPragma,
            "pragma missing",
        );
        record.fix_successful = true;
        record.fix_message = Some("state the pragma version explicitly".to_string());
        ctx.record_error(record);
        ctx.finalize();
        memory.add(&ctx);

        (dir, RepairEngine::new(memory))
    }

    #[test]
    fn test_memory_fix_takes_priority_over_pattern() {
        let (_dir, engine) = engine_with_memory_fix();
        let outcome = engine.repair(
            "an erc20",
            "",
            "pragma directive missing",
            Some(&ErrorKind::MissingPragma),
        );

        assert!(outcome.repaired);
        assert!(outcome.prompt.contains("state the pragma version explicitly"));
        assert!(outcome
            .description
            .as_deref()
            .unwrap()
            .contains("memory"));
    }

    #[test]
    fn test_pattern_repair_without_memory() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RepairEngine::new(Arc::new(AgentMemory::open(dir.path())));

        let outcome = engine.repair("an erc20", "", "pragma directive missing", None);
        assert!(outcome.repaired);
        assert!(outcome.prompt.contains("pragma solidity ^0.8.24"));
    }

    #[test]
    fn test_unmatched_error_leaves_inputs_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let engine = RepairEngine::new(Arc::new(AgentMemory::open(dir.path())));

        let outcome = engine.repair("an erc20", "ctx", "out of gas", None);
        assert!(!outcome.repaired);
        assert_eq!(outcome.prompt, "an erc20");
        assert_eq!(outcome.context, "ctx");
    }

    #[test]
    fn test_parse_rephrased_strips_header() {
        let text = "Sure, here it is.\n\nRephrased prompt: Generate an ERC20 token \
                    with pragma solidity ^0.8.24 and OpenZeppelin v5 imports.";
        let parsed = parse_rephrased(text).unwrap();
        assert!(parsed.starts_with("Generate an ERC20"));
    }

    #[test]
    fn test_parse_rephrased_rejects_noise() {
        assert!(parse_rephrased("ok").is_none());
        assert!(parse_rephrased("Rephrased prompt: \"short\"").is_none());
    }
}
