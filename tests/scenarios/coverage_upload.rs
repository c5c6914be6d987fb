//! Test: Coverage - merging instance reports and fail-ci-if-error

use crate::helpers::*;
use matrix_ci::core::ReportedStatus;
use matrix_ci::coverage::CoverageUploader;
use matrix_ci::execution::{CoverageOutcome, JobOutcome, SchedulingStrategy};
use std::sync::Arc;

const COVERAGE_JOB: &str = r#"
name: "Test: Coverage"
jobs:
  - id: coverage
    coverage:
      fail-ci-if-error: true
      env-vars: [JOB, TOOLCHAIN]
    strategy:
      matrix:
        toolchain: [stable, beta]
    steps:
      - name: Collect
        run: collect ${{ toolchain }}
"#;

fn lcov_executor() -> MockExecutor {
    MockExecutor::new()
        .on(
            "collect stable",
            Reply::Coverage("SF:src/lib.rs\nDA:1,1\nDA:2,0\nend_of_record\n".to_string()),
        )
        .on(
            "collect beta",
            Reply::Coverage("SF:src/lib.rs\nDA:2,3\nend_of_record\nSF:src/main.rs\nDA:1,0\nend_of_record\n".to_string()),
        )
}

/// Reports from every instance are merged and uploaded once with metadata
#[tokio::test]
async fn test_merged_coverage_uploaded() {
    let pipeline = pipeline_from_yaml(COVERAGE_JOB);
    let uploader = RecordingUploader::default();
    let uploads = uploader.uploads.clone();

    let result = run_pipeline_with(
        &pipeline,
        lcov_executor(),
        SchedulingStrategy::Parallel,
        Some(Arc::new(uploader) as Arc<dyn CoverageUploader>),
    )
    .await
    .unwrap();

    let uploads = uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let (report, metadata) = &uploads[0];

    let summary = report.summary();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.lines_found, 3);
    assert_eq!(summary.lines_hit, 2);

    assert_eq!(metadata.job, "coverage");
    assert_eq!(metadata.reports, 2);
    assert_eq!(metadata.env["JOB"], vec!["coverage"]);
    assert_eq!(metadata.env["TOOLCHAIN"], vec!["stable", "beta"]);

    assert!(matches!(
        result.result.job("coverage").unwrap().coverage,
        Some(CoverageOutcome::Uploaded(_))
    ));
    assert_eq!(result.result.status(), ReportedStatus::Succeeded);
}

/// No reports with fail-ci-if-error fails the pipeline
#[tokio::test]
async fn test_missing_coverage_escalates() {
    let pipeline = pipeline_from_yaml(COVERAGE_JOB);

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();

    let job = result.result.job("coverage").unwrap();
    assert_eq!(job.status, JobOutcome::FailedFatal);
    assert!(matches!(
        job.coverage,
        Some(CoverageOutcome::Failed { escalated: true, .. })
    ));
    assert!(result.result.failed());
    assert_eq!(result.result.status(), ReportedStatus::Failed);
}

/// Without fail-ci-if-error an upload failure is only tolerated
#[tokio::test]
async fn test_upload_failure_tolerated() {
    let pipeline = pipeline_from_yaml(&COVERAGE_JOB.replace("fail-ci-if-error: true", "fail-ci-if-error: false"));
    let uploader = RecordingUploader {
        fail: true,
        ..Default::default()
    };

    let result = run_pipeline_with(
        &pipeline,
        lcov_executor(),
        SchedulingStrategy::Parallel,
        Some(Arc::new(uploader) as Arc<dyn CoverageUploader>),
    )
    .await
    .unwrap();

    let job = result.result.job("coverage").unwrap();
    assert_eq!(job.status, JobOutcome::Succeeded);
    match &job.coverage {
        Some(CoverageOutcome::Failed { error, escalated }) => {
            assert!(!escalated);
            assert!(error.contains("service unavailable"));
        }
        other => panic!("expected coverage failure, got {:?}", other),
    }
    assert!(!result.result.failed());
    assert_eq!(result.result.status(), ReportedStatus::FailedButTolerated);
}

/// One instance losing its report fails the merge instead of uploading
/// partial coverage
#[tokio::test]
async fn test_one_missing_report_escalates() {
    let pipeline = pipeline_from_yaml(COVERAGE_JOB);
    let uploader = RecordingUploader::default();
    let uploads = uploader.uploads.clone();

    let executor = MockExecutor::new()
        .on(
            "collect stable",
            Reply::Coverage("SF:src/lib.rs\nDA:1,1\nend_of_record\n".to_string()),
        )
        .on("collect beta", Reply::MissingCoverage("lcov.info".to_string()));

    let result = run_pipeline_with(
        &pipeline,
        executor,
        SchedulingStrategy::Parallel,
        Some(Arc::new(uploader) as Arc<dyn CoverageUploader>),
    )
    .await
    .unwrap();

    assert!(uploads.lock().unwrap().is_empty());
    let job = result.result.job("coverage").unwrap();
    assert_eq!(job.status, JobOutcome::FailedFatal);
    match &job.coverage {
        Some(CoverageOutcome::Failed { error, escalated }) => {
            assert!(*escalated);
            assert!(error.contains("coverage (beta)"), "unexpected error: {}", error);
            assert!(error.contains("lcov.info"));
        }
        other => panic!("unexpected coverage outcome {:?}", other),
    }
    assert_eq!(result.result.status(), ReportedStatus::Failed);
}

