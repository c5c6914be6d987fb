//! Uploader writing merged reports to a local directory

use crate::coverage::{CoverageReport, CoverageUploader, MergeError, UploadMetadata};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// Writes `<job>.lcov` and `<job>.json` into a directory
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    dir: PathBuf,
}

impl DirectoryUploader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CoverageUploader for DirectoryUploader {
    async fn upload(&self, report: &CoverageReport, metadata: &UploadMetadata) -> Result<(), MergeError> {
        let to_upload_error = |e: std::io::Error| MergeError::Upload(format!("{}: {}", self.dir.display(), e));

        tokio::fs::create_dir_all(&self.dir).await.map_err(to_upload_error)?;

        let lcov_path = self.dir.join(format!("{}.lcov", metadata.job));
        tokio::fs::write(&lcov_path, report.to_lcov())
            .await
            .map_err(to_upload_error)?;

        let summary = report.summary();
        let document = json!({
            "metadata": metadata,
            "summary": summary,
            "line_percent": summary.line_percent(),
        });
        let body = serde_json::to_string_pretty(&document).map_err(|e| MergeError::Upload(e.to_string()))?;
        tokio::fs::write(self.dir.join(format!("{}.json", metadata.job)), body)
            .await
            .map_err(to_upload_error)?;

        info!(
            "Coverage for job {} written to {} ({:.1}% lines)",
            metadata.job,
            lcov_path.display(),
            summary.line_percent()
        );
        Ok(())
    }
}
