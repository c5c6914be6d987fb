//! Test: Job Dependencies - `needs` ordering and skip propagation

use crate::helpers::*;
use matrix_ci::core::ReportedStatus;
use matrix_ci::execution::{ExecutionEvent, JobOutcome};

/// A job starts only after every job it needs has finished
#[tokio::test]
async fn test_needs_ordering() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Needs"
jobs:
  - id: deploy
    needs: [build, lint]
    steps:
      - run: deploy
  - id: build
    strategy:
      matrix:
        target: [a, b]
    steps:
      - run: build ${{ target }}
  - id: lint
    steps:
      - run: lint
"#,
    );

    assert_eq!(pipeline.execution_order(), &["build", "lint", "deploy"]);

    let executor = MockExecutor::new().with_delay(std::time::Duration::from_millis(5));
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    let deploy_at = result.calls.iter().position(|c| c.action == "run: deploy").unwrap();
    assert_eq!(deploy_at, result.calls.len() - 1);

    let job_order: Vec<&str> = result.result.jobs.iter().map(|j| j.job.as_str()).collect();
    assert_eq!(job_order, vec!["build", "lint", "deploy"]);
    assert_eq!(result.result.status(), ReportedStatus::Succeeded);
}

/// Jobs downstream of a fatal failure are skipped; unrelated jobs still run
#[tokio::test]
async fn test_failed_need_skips_dependents() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Skip"
jobs:
  - id: test
    steps:
      - run: cargo test
  - id: package
    needs: [test]
    steps:
      - run: cargo package
  - id: publish
    needs: [package]
    steps:
      - run: cargo publish
  - id: docs
    steps:
      - run: cargo doc
"#,
    );

    let executor = MockExecutor::new().failing_on("cargo test");
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_eq!(result.result.job("test").unwrap().status, JobOutcome::FailedFatal);
    assert_eq!(result.result.job("package").unwrap().status, JobOutcome::Skipped);
    assert_eq!(result.result.job("publish").unwrap().status, JobOutcome::Skipped);
    assert_eq!(result.result.job("docs").unwrap().status, JobOutcome::Succeeded);
    assert_eq!(
        result.result.job("publish").unwrap().reported_status(),
        ReportedStatus::Failed
    );

    let skipped: Vec<&str> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::JobSkipped { job, .. } => Some(job.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["package", "publish"]);
    assert!(!result.calls.iter().any(|c| c.action.contains("package") || c.action.contains("publish")));
}

/// A tolerated failure upstream does not block dependents
#[tokio::test]
async fn test_tolerated_need_does_not_block() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Tolerated Need"
jobs:
  - id: test
    continue-on-error: true
    steps:
      - run: cargo test
  - id: package
    needs: [test]
    steps:
      - run: cargo package
"#,
    );

    let executor = MockExecutor::new().failing_on("cargo test");
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_eq!(result.result.job("test").unwrap().status, JobOutcome::FailedButTolerated);
    assert_eq!(result.result.job("package").unwrap().status, JobOutcome::Succeeded);
    assert_eq!(result.result.status(), ReportedStatus::FailedButTolerated);
}
