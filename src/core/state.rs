//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Pipeline completed successfully (possibly with tolerated failures)
    Completed,
    /// Pipeline failed
    Failed,
}

/// Final state of a single step within an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepState {
    /// Step action ran and succeeded
    Succeeded {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed. `tolerated` is set when step-level continue-on-error
    /// absorbed the failure.
    Failed {
        error: String,
        tolerated: bool,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step condition was false
    Skipped { reason: String },
}

impl StepState {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepState::Failed { .. })
    }

    /// Failed and not absorbed by the step's own continue-on-error
    pub fn is_blocking_failure(&self) -> bool {
        matches!(self, StepState::Failed { tolerated: false, .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepState::Skipped { .. })
    }
}

/// Outcome of one step, as recorded for an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step display name
    pub name: String,
    pub state: StepState,
}

/// Final status of a single job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Every step succeeded or was skipped
    Succeeded,
    /// A step failed but the instance is allowed to fail
    FailedButTolerated,
    /// A step failed and the failure counts against the pipeline
    FailedFatal,
    /// Fail-fast stopped the instance before it finished
    Cancelled,
}

impl JobStatus {
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobStatus::FailedFatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::FailedButTolerated => "failed (tolerated)",
            JobStatus::FailedFatal => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Three-valued outcome reported to the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Succeeded,
    Failed,
    FailedButTolerated,
}

impl ReportedStatus {
    /// Whether the pipeline as a whole counts as passing
    pub fn is_success(&self) -> bool {
        !matches!(self, ReportedStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedStatus::Succeeded => "succeeded",
            ReportedStatus::Failed => "failed",
            ReportedStatus::FailedButTolerated => "failed-but-tolerated",
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of job instances
    pub total_instances: usize,

    /// Number of instances that finished, whatever their status
    pub finished_instances: usize,

    /// Number of instances whose failure was fatal
    pub failed_instances: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_instances: 0,
            finished_instances: 0,
            failed_instances: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_instances: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_instances = total_instances;
    }

    /// Record a finished instance
    pub fn record(&mut self, status: JobStatus) {
        self.finished_instances += 1;
        if status.is_fatal() {
            self.failed_instances += 1;
        }
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_instances == 0 {
            return 0.0;
        }
        self.finished_instances as f64 / self.total_instances as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
