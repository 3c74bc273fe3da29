//! Retry limits and escalation delivery.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use model::{Stage, WorkflowContext};

/// Webhook delivery timeout.
const WEBHOOK_TIMEOUT_SECS: u64 = 5;

/// Escalation payloads truncate the user prompt to this many characters.
const PROMPT_TRUNCATE_CHARS: usize = 200;

/// Guardrail policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    pub max_retries_per_stage: u32,
    pub enable_escalation: bool,
    pub escalation_webhook_url: Option<String>,
    pub pause_on_max_retries: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_stage: 3,
            enable_escalation: true,
            escalation_webhook_url: None,
            pause_on_max_retries: false,
        }
    }
}

/// The persisted escalation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub error: String,
    pub workflow_id: String,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_bundle: Option<PathBuf>,
    /// First 200 characters of the user prompt.
    pub user_prompt: String,
}

/// Enforces retry limits and delivers escalations.
pub struct Guardrails {
    workspace_dir: PathBuf,
    policy: GuardrailPolicy,
    client: reqwest::Client,
}

impl Guardrails {
    pub fn new(workspace_dir: impl Into<PathBuf>, policy: GuardrailPolicy) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            policy,
            client: reqwest::Client::new(),
        }
    }

    pub fn policy(&self) -> &GuardrailPolicy {
        &self.policy
    }

    /// Whether the retry budget for a stage is exhausted.
    pub fn retry_limit_exceeded(&self, retry_count: u32) -> bool {
        retry_count >= self.policy.max_retries_per_stage
    }

    /// Escalate a stage failure after the budget ran out.
    ///
    /// Writes the escalation record to disk and, when configured, POSTs it
    /// to the webhook. Neither failure path propagates.
    pub async fn escalate(
        &self,
        stage: Stage,
        error: &str,
        context: &WorkflowContext,
        diagnostic_bundle: Option<&Path>,
    ) {
        if !self.policy.enable_escalation {
            return;
        }

        let record = EscalationRecord {
            timestamp: Utc::now(),
            stage,
            error: error.to_string(),
            workflow_id: context.workflow_id.clone(),
            retry_count: context.retry_count(stage),
            diagnostic_bundle: diagnostic_bundle.map(Path::to_path_buf),
            user_prompt: context
                .user_prompt
                .chars()
                .take(PROMPT_TRUNCATE_CHARS)
                .collect(),
        };

        tracing::error!(
            stage = %stage,
            retry_count = record.retry_count,
            workflow_id = %record.workflow_id,
            "ESCALATION: stage failed after retry budget exhausted"
        );

        self.save_record(&record);

        if self.policy.escalation_webhook_url.is_some() {
            self.send_webhook(&record).await;
        }

        if self.policy.pause_on_max_retries {
            tracing::warn!("Workflow paused for manual review (pause_on_max_retries is set)");
        }
    }

    fn save_record(&self, record: &EscalationRecord) {
        let path = self
            .workspace_dir
            .join("logs/escalations")
            .join(format!(
                "escalation_{}.json",
                record.timestamp.format("%Y%m%d_%H%M%S")
            ));
        if let Err(e) = model::fsutil::write_json_atomic(&path, record) {
            tracing::warn!(error = %e, "Failed to save escalation log");
        } else {
            tracing::debug!(path = %path.display(), "Escalation log saved");
        }
    }

    /// Slack-compatible webhook payload. Delivery failures are swallowed.
    async fn send_webhook(&self, record: &EscalationRecord) {
        let Some(url) = &self.policy.escalation_webhook_url else {
            return;
        };

        let payload = serde_json::json!({
            "text": format!("Forgeflow escalation: {} failed", record.stage),
            "attachments": [{
                "color": "danger",
                "fields": [
                    { "title": "Stage", "value": record.stage.as_str(), "short": true },
                    { "title": "Workflow ID", "value": record.workflow_id.clone(), "short": true },
                    { "title": "Retry Count", "value": record.retry_count.to_string(), "short": true },
                    { "title": "Error", "value": truncate(&record.error, 500), "short": false },
                ]
            }]
        });

        let result = self
            .client
            .post(url)
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::info!("Escalation webhook delivered");
            }
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Escalation webhook rejected");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Escalation webhook failed");
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_limit_boundary() {
        let guardrails = Guardrails::new(".", GuardrailPolicy::default());
        assert!(!guardrails.retry_limit_exceeded(2));
        assert!(guardrails.retry_limit_exceeded(3));
        assert!(guardrails.retry_limit_exceeded(4));
    }

    #[tokio::test]
    async fn test_escalation_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let guardrails = Guardrails::new(
            dir.path(),
            GuardrailPolicy {
                enable_escalation: false,
                ..Default::default()
            },
        );

        let ctx = WorkflowContext::new("prompt");
        guardrails
            .escalate(Stage::Generation, "boom", &ctx, None)
            .await;

        assert!(!dir.path().join("logs/escalations").exists());
    }

    #[tokio::test]
    async fn test_escalation_record_written() {
        let dir = tempfile::tempdir().unwrap();
        let guardrails = Guardrails::new(dir.path(), GuardrailPolicy::default());

        let long_prompt = "p".repeat(500);
        let mut ctx = WorkflowContext::new(long_prompt);
        ctx.bump_retry(Stage::Generation);
        ctx.bump_retry(Stage::Generation);
        ctx.bump_retry(Stage::Generation);

        guardrails
            .escalate(Stage::Generation, "generation kept failing", &ctx, None)
            .await;

        let escalations_dir = dir.path().join("logs/escalations");
        let entries: Vec<_> = std::fs::read_dir(&escalations_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let content =
            std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        let record: EscalationRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.stage, Stage::Generation);
        assert_eq!(record.retry_count, 3);
        // Prompt truncated to 200 chars in the payload.
        assert_eq!(record.user_prompt.chars().count(), 200);
    }
}
