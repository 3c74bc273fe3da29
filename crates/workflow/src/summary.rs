//! Human-readable workflow summary for the CLI.

use colored::Colorize;

use guardrails::friendly_error;
use model::{Stage, StageStatus, WorkflowContext, WorkflowStatus};

/// Process exit code for a terminated workflow.
pub fn exit_code(ctx: &WorkflowContext) -> i32 {
    match ctx.status {
        WorkflowStatus::Error => 1,
        _ => 0,
    }
}

/// Print the end-of-run summary.
pub fn print_summary(ctx: &WorkflowContext) {
    let status = match ctx.status {
        WorkflowStatus::Success => "success".green().bold(),
        WorkflowStatus::CompletedWithErrors => "completed with errors".yellow().bold(),
        WorkflowStatus::Error => "error".red().bold(),
        WorkflowStatus::Running => "running".normal(),
    };

    println!();
    println!("{} {}", "Workflow".bold(), ctx.workflow_id.dimmed());
    println!("  status: {status}");

    // Last attempt per stage, in sequence order.
    for stage in Stage::SEQUENCE {
        if let Some(result) = ctx.stages.iter().rev().find(|s| s.stage == stage) {
            let marker = match result.status {
                StageStatus::Success => "ok".green(),
                StageStatus::Degraded => "degraded".yellow(),
                StageStatus::Skipped => "skipped".dimmed(),
                StageStatus::Error => "failed".red(),
            };
            let attempts = ctx.retry_count(stage);
            let attempts_note = if attempts > 1 {
                format!(" ({attempts} attempts)")
            } else {
                String::new()
            };
            println!("  {:<24} {marker}{attempts_note}", stage.as_str());
        }
    }

    // Deployment details, when present.
    if let Some(deployment) = ctx
        .stages
        .iter()
        .rev()
        .find(|s| s.stage == Stage::Deployment && s.status == StageStatus::Success)
    {
        if let Some(address) = deployment.outputs_summary.get("address").and_then(|v| v.as_str()) {
            println!("  {}: {}", "address".bold(), address);
        }
        if let Some(tx) = deployment.outputs_summary.get("tx_hash").and_then(|v| v.as_str()) {
            println!("  {}: {}", "tx hash".bold(), tx);
        }
    }

    if !ctx.rag_status.sources.is_empty() {
        println!(
            "  {}: {}",
            "context sources".bold(),
            ctx.rag_status.sources.join(", ")
        );
    }

    if let Some(path) = &ctx.diagnostic_bundle_path {
        println!("  {}: {}", "diagnostics".bold(), path.display());
    }

    // Advice for the most consequential failure.
    if let Some(failed_stage) = Stage::SEQUENCE
        .iter()
        .find(|s| ctx.stage_failed(**s))
        .copied()
    {
        if let Some(record) = ctx
            .error_history
            .iter()
            .rev()
            .find(|r| r.stage == failed_stage)
        {
            let advice = friendly_error(failed_stage, &record.error_message, Some(&record.error_type));
            println!();
            println!("{}", advice.friendly_message.yellow());
            for (i, suggestion) in advice.suggestions.iter().enumerate() {
                println!("  {}. {suggestion}", i + 1);
            }
            println!("{}", advice.help_text.dimmed());
        }
    }
    println!();
}
