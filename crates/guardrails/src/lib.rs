//! # Guardrails
//!
//! Retry-budget enforcement, escalation, and user-facing failure advice.
//!
//! When a stage exhausts its retry budget the guardrails write a JSON
//! escalation record under `logs/escalations/` and optionally POST the
//! same payload to a configured webhook. Webhook delivery is best-effort:
//! a failure is logged and swallowed, never surfaced to the workflow.

pub mod escalation;
pub mod friendly;

pub use escalation::{EscalationRecord, Guardrails, GuardrailPolicy};
pub use friendly::{friendly_error, FriendlyError};
