//! CLI output formatting

use crate::{
    core::{JobStatus, ReportedStatus, StepState},
    execution::{CoverageOutcome, ExecutionEvent, JobOutcome, JobReport, PipelineResult},
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar counting finished instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .map(|style| style.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

fn reported_icon(status: ReportedStatus) -> Emoji<'static, 'static> {
    match status {
        ReportedStatus::Succeeded => CHECK,
        ReportedStatus::FailedButTolerated => WARN,
        ReportedStatus::Failed => CROSS,
    }
}

/// Format a reported status for display
pub fn format_reported(status: ReportedStatus) -> String {
    match status {
        ReportedStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ReportedStatus::FailedButTolerated => style("FAILED (TOLERATED)").yellow().to_string(),
        ReportedStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format an instance status for display
pub fn format_job_status(status: JobStatus) -> String {
    match status {
        JobStatus::Succeeded => style(status.as_str()).green().to_string(),
        JobStatus::FailedButTolerated => style(status.as_str()).yellow().to_string(),
        JobStatus::FailedFatal => style(status.as_str()).red().to_string(),
        JobStatus::Cancelled => style(status.as_str()).dim().to_string(),
    }
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Succeeded { .. } => style("ok").green().to_string(),
        StepState::Failed { error, tolerated: true, .. } => {
            format!("{} {}", style("failed (tolerated)").yellow(), style(error).dim())
        }
        StepState::Failed { error, .. } => format!("{} {}", style("failed").red(), style(error).dim()),
        StepState::Skipped { reason } => format!("{} {}", style("skipped").dim(), style(reason).dim()),
    }
}

/// Format a coverage outcome for display
pub fn format_coverage(outcome: &CoverageOutcome) -> String {
    match outcome {
        CoverageOutcome::Uploaded(summary) => format!(
            "coverage uploaded: {:.1}% of {} lines",
            summary.line_percent(),
            summary.lines_found
        ),
        CoverageOutcome::Merged(summary) => format!(
            "coverage merged: {:.1}% of {} lines",
            summary.line_percent(),
            summary.lines_found
        ),
        CoverageOutcome::Failed { error, escalated } => format!(
            "coverage failed{}: {}",
            if *escalated { " (fail-ci-if-error)" } else { "" },
            error
        ),
    }
}

/// Format an execution event for display. Per-step events are only shown
/// when `verbose` is set.
pub fn format_execution_event(event: &ExecutionEvent, verbose: bool) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_instances,
        } => format!(
            "{} Starting pipeline {} with {} instances ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(total_instances).cyan(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::JobStarted { job, instances } => format!(
            "{} {} ({} instances)",
            SPINNER,
            style(job).cyan(),
            instances
        ),
        ExecutionEvent::JobSkipped { job, reason } => {
            format!("{} {} skipped: {}", SKIP, style(job).dim(), reason)
        }
        ExecutionEvent::StepStarted { instance, step } if verbose => {
            format!("  {} {} > {}", SPINNER, style(instance).dim(), step)
        }
        ExecutionEvent::StepFinished { instance, step, state } if verbose => format!(
            "  {} > {}: {}",
            style(instance).dim(),
            step,
            format_step_state(state)
        ),
        ExecutionEvent::InstanceCompleted { instance, status } => {
            let icon = match status {
                JobStatus::Succeeded => CHECK,
                JobStatus::FailedButTolerated => WARN,
                JobStatus::FailedFatal => CROSS,
                JobStatus::Cancelled => SKIP,
            };
            format!("{} {} {}", icon, instance, format_job_status(*status))
        }
        ExecutionEvent::CoverageProcessed { job, outcome } => {
            let icon = if matches!(outcome, CoverageOutcome::Failed { .. }) { WARN } else { INFO };
            format!("{} {}: {}", icon, style(job).cyan(), format_coverage(outcome))
        }
        ExecutionEvent::JobCompleted { job, status } => format!(
            "{} {} {}",
            reported_icon(status.reported_status()),
            style(job).bold(),
            format_outcome(*status)
        ),
        ExecutionEvent::PipelineCompleted { .. }
        | ExecutionEvent::InstanceStarted { .. }
        | ExecutionEvent::StepStarted { .. }
        | ExecutionEvent::StepFinished { .. } => return None,
    };
    Some(line)
}

/// Format a job-level outcome for display
pub fn format_outcome(outcome: JobOutcome) -> String {
    match outcome {
        JobOutcome::Skipped => style("SKIPPED").dim().to_string(),
        other => format_reported(other.reported_status()),
    }
}

/// One line per job plus its instances
pub fn format_job_report(report: &JobReport) -> String {
    let mut out = format!(
        "{} {} {}",
        reported_icon(report.reported_status()),
        style(&report.name).bold(),
        format_outcome(report.status)
    );
    if let Some(reason) = &report.skip_reason {
        out.push_str(&format!(" ({})", style(reason).dim()));
    }
    for result in &report.instances {
        out.push_str(&format!(
            "\n    {} {}",
            result.instance.display_name(),
            format_job_status(result.status)
        ));
        if let Some(failed) = result.steps.iter().find(|s| s.state.is_failure()) {
            out.push_str(&format!(" at {}", style(&failed.name).yellow()));
        }
    }
    if let Some(coverage) = &report.coverage {
        out.push_str(&format!("\n    {}", format_coverage(coverage)));
    }
    out
}

/// Final summary block for a run
pub fn format_pipeline_result(result: &PipelineResult) -> String {
    let mut out = String::new();
    for report in &result.jobs {
        out.push_str(&format_job_report(report));
        out.push('\n');
    }
    out.push_str(&format!(
        "\n{} {} {} in {}",
        reported_icon(result.status()),
        style(&result.pipeline).bold(),
        format_reported(result.status()),
        format_duration(Duration::from_secs_f64(result.duration_secs().max(0.0)))
    ));
    out
}

/// Format a history entry for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    format!(
        "{} {} - {} - {} - {} instances ({} ok, {} tolerated, {} failed, {} cancelled) - {}",
        reported_icon(summary.status),
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_reported(summary.status),
        summary.total_instances,
        style(summary.succeeded).green(),
        style(summary.tolerated).yellow(),
        style(summary.failed).red(),
        summary.cancelled,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
