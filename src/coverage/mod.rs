//! Coverage aggregation and upload

pub mod report;
pub mod upload;

use async_trait::async_trait;
pub use report::{CoverageReport, CoverageSummary, FileCoverage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
pub use upload::DirectoryUploader;

/// Failure to produce or hand off a merged coverage report
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no coverage reports were produced")]
    NoReports,

    #[error("instance {instance} did not produce coverage report {report}")]
    MissingReport { instance: String, report: String },

    #[error("invalid LCOV at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Metadata sent along with a merged report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Job that produced the coverage
    pub job: String,

    /// Number of reports merged
    pub reports: usize,

    /// Configured environment variables, with the distinct values seen
    /// across instances in instance order
    pub env: BTreeMap<String, Vec<String>>,
}

impl UploadMetadata {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            ..Default::default()
        }
    }

    /// Record a value of a configured variable, ignoring repeats
    pub fn record(&mut self, key: &str, value: &str) {
        let values = self.env.entry(key.to_string()).or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
}

/// Destination for merged coverage
#[async_trait]
pub trait CoverageUploader: Send + Sync {
    async fn upload(&self, report: &CoverageReport, metadata: &UploadMetadata) -> Result<(), MergeError>;
}
