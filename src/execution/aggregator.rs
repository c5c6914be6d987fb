//! Result aggregation - job reports, pipeline status and coverage hand-off

use crate::core::{
    context::matrix_env_name, Job, JobInstance, JobStatus, ReportedStatus, StepResult, StepState,
};
use crate::coverage::{CoverageReport, CoverageSummary, CoverageUploader, MergeError, UploadMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub instance: JobInstance,
    pub status: JobStatus,

    /// Results of the steps that ran or were skipped, in order
    pub steps: Vec<StepResult>,

    /// Raw LCOV reports produced by the instance's actions
    pub coverage_reports: Vec<String>,

    /// Coverage reports steps asked for that could not be read
    pub missing_coverage: Vec<String>,

    /// Instance environment as it stood when the instance stopped
    pub env: HashMap<String, String>,
}

impl JobResult {
    /// Result for an instance whose task stopped without reporting.
    /// The failure is tolerated only when the instance itself is.
    pub fn crashed(instance: JobInstance, error: impl Into<String>) -> Self {
        let now = Utc::now();
        let tolerated = instance.continue_on_error;
        Self {
            instance,
            status: if tolerated {
                JobStatus::FailedButTolerated
            } else {
                JobStatus::FailedFatal
            },
            steps: vec![StepResult {
                name: "instance".to_string(),
                state: StepState::Failed {
                    error: error.into(),
                    tolerated,
                    started_at: now,
                    failed_at: now,
                },
            }],
            coverage_reports: Vec::new(),
            missing_coverage: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn reported_status(&self) -> ReportedStatus {
        match self.status {
            JobStatus::Succeeded => ReportedStatus::Succeeded,
            JobStatus::FailedButTolerated => ReportedStatus::FailedButTolerated,
            JobStatus::FailedFatal | JobStatus::Cancelled => ReportedStatus::Failed,
        }
    }
}

/// Job-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    FailedButTolerated,
    FailedFatal,
    /// Not run because a job it needs did not succeed
    Skipped,
}

impl JobOutcome {
    pub fn reported_status(&self) -> ReportedStatus {
        match self {
            JobOutcome::Succeeded => ReportedStatus::Succeeded,
            JobOutcome::FailedButTolerated => ReportedStatus::FailedButTolerated,
            JobOutcome::FailedFatal | JobOutcome::Skipped => ReportedStatus::Failed,
        }
    }

    /// Whether jobs that need this one must be skipped
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, JobOutcome::FailedFatal | JobOutcome::Skipped)
    }
}

/// What happened to a job's coverage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoverageOutcome {
    /// Merged and handed to the uploader
    Uploaded(CoverageSummary),
    /// Merged; no uploader was configured
    Merged(CoverageSummary),
    /// Merging or uploading failed. `escalated` when the job failed because of it.
    Failed { error: String, escalated: bool },
}

impl CoverageOutcome {
    pub fn is_escalated(&self) -> bool {
        matches!(self, CoverageOutcome::Failed { escalated: true, .. })
    }
}

/// All instance results of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job: String,
    pub name: String,
    pub status: JobOutcome,
    /// Instance results ordered by instance index
    pub instances: Vec<JobResult>,
    pub coverage: Option<CoverageOutcome>,
    /// Why the job was skipped, if it was
    pub skip_reason: Option<String>,
}

impl JobReport {
    /// Report for a job that never ran
    pub fn skipped(job: &Job, reason: impl Into<String>) -> Self {
        Self {
            job: job.id.clone(),
            name: job.name.clone(),
            status: JobOutcome::Skipped,
            instances: Vec::new(),
            coverage: None,
            skip_reason: Some(reason.into()),
        }
    }

    /// Report for a job whose task died while handing off coverage
    pub fn crashed(job: &Job, error: impl Into<String>) -> Self {
        Self {
            job: job.id.clone(),
            name: job.name.clone(),
            status: JobOutcome::FailedFatal,
            instances: Vec::new(),
            coverage: Some(CoverageOutcome::Failed {
                error: error.into(),
                escalated: true,
            }),
            skip_reason: None,
        }
    }

    pub fn reported_status(&self) -> ReportedStatus {
        self.status.reported_status()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.instances.iter().filter(|r| r.status == status).count()
    }
}

/// Outcome of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub execution_id: Uuid,
    pub pipeline: String,
    /// Job reports in execution order
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Failed iff any instance failed fatally or an escalated coverage failure
    pub fn failed(&self) -> bool {
        self.jobs.iter().any(|job| {
            job.instances.iter().any(|r| r.status == JobStatus::FailedFatal)
                || job.coverage.as_ref().is_some_and(CoverageOutcome::is_escalated)
        })
    }

    /// Overall reported status
    pub fn status(&self) -> ReportedStatus {
        if self.failed() {
            return ReportedStatus::Failed;
        }
        let tolerated = self.jobs.iter().any(|job| {
            job.status == JobOutcome::FailedButTolerated
                || matches!(job.coverage, Some(CoverageOutcome::Failed { .. }))
        });
        if tolerated {
            ReportedStatus::FailedButTolerated
        } else {
            ReportedStatus::Succeeded
        }
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.job == id)
    }

    /// Every instance result across all jobs
    pub fn instances(&self) -> impl Iterator<Item = &JobResult> {
        self.jobs.iter().flat_map(|job| job.instances.iter())
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.instances().filter(|r| r.status == status).count()
    }

    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Builds job reports from instance results and handles coverage
#[derive(Clone, Default)]
pub struct ResultAggregator {
    uploader: Option<Arc<dyn CoverageUploader>>,
}

impl ResultAggregator {
    pub fn new(uploader: Option<Arc<dyn CoverageUploader>>) -> Self {
        Self { uploader }
    }

    /// Job status from its instance results alone
    pub fn job_status(results: &[JobResult]) -> JobOutcome {
        if results.iter().any(|r| r.status.is_fatal()) {
            JobOutcome::FailedFatal
        } else if results
            .iter()
            .any(|r| matches!(r.status, JobStatus::FailedButTolerated | JobStatus::Cancelled))
        {
            JobOutcome::FailedButTolerated
        } else {
            JobOutcome::Succeeded
        }
    }

    /// Build the report for a finished job, merging and uploading coverage
    /// when the job asks for it.
    pub async fn job_report(&self, job: &Job, mut results: Vec<JobResult>) -> JobReport {
        results.sort_by_key(|r| r.instance.index);
        let mut status = Self::job_status(&results);

        let coverage = match &job.coverage {
            Some(settings) => {
                let outcome = match self.process_coverage(job, &results, &settings.env_vars).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Coverage for job {} failed: {}", job.id, e);
                        CoverageOutcome::Failed {
                            error: e.to_string(),
                            escalated: settings.fail_ci_if_error,
                        }
                    }
                };
                if outcome.is_escalated() {
                    status = JobOutcome::FailedFatal;
                }
                Some(outcome)
            }
            None => None,
        };

        JobReport {
            job: job.id.clone(),
            name: job.name.clone(),
            status,
            instances: results,
            coverage,
            skip_reason: None,
        }
    }

    async fn process_coverage(
        &self,
        job: &Job,
        results: &[JobResult],
        env_vars: &[String],
    ) -> Result<CoverageOutcome, MergeError> {
        // Every report a step asked for must be present
        if let Some((result, report)) = results
            .iter()
            .find_map(|r| r.missing_coverage.first().map(|report| (r, report)))
        {
            return Err(MergeError::MissingReport {
                instance: result.instance.display_name(),
                report: report.clone(),
            });
        }

        let reports: Vec<&str> = results
            .iter()
            .flat_map(|r| r.coverage_reports.iter().map(String::as_str))
            .collect();
        let merged = CoverageReport::merge_all(reports.iter().copied())?;
        let summary = merged.summary();

        let mut metadata = UploadMetadata::new(&job.id);
        metadata.reports = reports.len();
        for result in results {
            for var in env_vars {
                let value = result
                    .env
                    .get(var)
                    .or_else(|| result.env.get(&matrix_env_name(var)));
                if let Some(value) = value {
                    metadata.record(var, value);
                }
            }
        }

        match &self.uploader {
            Some(uploader) => {
                uploader.upload(&merged, &metadata).await?;
                info!(
                    "Job {}: uploaded coverage from {} reports ({:.1}% lines)",
                    job.id,
                    reports.len(),
                    summary.line_percent()
                );
                Ok(CoverageOutcome::Uploaded(summary))
            }
            None => Ok(CoverageOutcome::Merged(summary)),
        }
    }
}
