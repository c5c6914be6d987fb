//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

use crate::core::{JobStatus, ReportedStatus};
use crate::execution::{JobOutcome, PipelineResult};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Reported outcome of the run
    pub status: ReportedStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of instances that ran or were cancelled
    pub total_instances: usize,

    pub succeeded: usize,
    pub tolerated: usize,
    pub failed: usize,
    pub cancelled: usize,

    /// Jobs not run because a needed job failed
    pub skipped_jobs: usize,
}

/// Parse a status stored by [`ReportedStatus::as_str`]
pub fn parse_status(value: &str) -> ReportedStatus {
    match value {
        "succeeded" => ReportedStatus::Succeeded,
        "failed-but-tolerated" => ReportedStatus::FailedButTolerated,
        _ => ReportedStatus::Failed,
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline run
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all runs of a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or `--no-history`)
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
    by_pipeline: RwLock<HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            by_pipeline: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let is_new = execs.insert(execution.execution_id, execution.clone()).is_none();

        if is_new {
            self.by_pipeline
                .write()
                .await
                .entry(execution.pipeline_name.clone())
                .or_default()
                .push(execution.execution_id);
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_pipeline = self.by_pipeline.read().await;

        let mut result: Vec<ExecutionSummary> = by_pipeline
            .get(pipeline_name)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let by_pipeline = self.by_pipeline.read().await;
        let mut names: Vec<String> = by_pipeline.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Create a summary from a finished run
pub fn create_summary(result: &PipelineResult) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: result.execution_id,
        pipeline_name: result.pipeline.clone(),
        status: result.status(),
        started_at: result.started_at,
        completed_at: Some(result.completed_at),
        total_instances: result.instances().count(),
        succeeded: result.count(JobStatus::Succeeded),
        tolerated: result.count(JobStatus::FailedButTolerated),
        failed: result.count(JobStatus::FailedFatal),
        cancelled: result.count(JobStatus::Cancelled),
        skipped_jobs: result
            .jobs
            .iter()
            .filter(|job| job.status == JobOutcome::Skipped)
            .count(),
    }
}
