//! Test: Failure Handling - continue-on-error, fail-fast and reported status

use crate::helpers::*;
use matrix_ci::core::{JobStatus, ReportedStatus, StepState};
use matrix_ci::execution::{ExecutionEvent, JobOutcome, SchedulingStrategy};

/// A tolerant instance keeps running after a failure; the run is reported
/// as failed-but-tolerated
#[tokio::test]
async fn test_tolerant_instance_keeps_running() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Tolerated"
jobs:
  - id: test
    continue-on-error: "toolchain == 'nightly'"
    strategy:
      matrix:
        toolchain: [stable, nightly]
    steps:
      - name: Test
        run: cargo +${{ toolchain }} test
      - name: Docs
        run: cargo +${{ toolchain }} doc
"#,
    );

    let executor = MockExecutor::new().failing_on("+nightly test");
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_instance_status(&result, "test", "test (stable)", JobStatus::Succeeded);
    assert_instance_status(&result, "test", "test (nightly)", JobStatus::FailedButTolerated);
    assert!(matches!(
        result.step_state("test", "test (nightly)", "Test"),
        Some(StepState::Failed { tolerated: true, .. })
    ));
    assert_step_succeeded(&result, "test", "test (nightly)", "Docs");

    assert!(!result.result.failed());
    assert_eq!(result.result.job("test").unwrap().status, JobOutcome::FailedButTolerated);
    assert_eq!(result.result.status(), ReportedStatus::FailedButTolerated);
}

/// An intolerant instance never runs the steps after its failure
#[tokio::test]
async fn test_intolerant_instance_stops() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Fatal"
jobs:
  - id: test
    continue-on-error: "toolchain == 'nightly'"
    strategy:
      fail-fast: false
      matrix:
        toolchain: [stable, nightly]
    steps:
      - name: Test
        run: cargo +${{ toolchain }} test
      - name: Docs
        run: cargo +${{ toolchain }} doc
"#,
    );

    let executor = MockExecutor::new().failing_on("+stable test");
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_step_failed(&result, "test", "test (stable)", "Test", "exited with code 1");
    assert!(result.step_state("test", "test (stable)", "Docs").is_none());
    assert_instance_status(&result, "test", "test (stable)", JobStatus::FailedFatal);
    assert_instance_status(&result, "test", "test (nightly)", JobStatus::Succeeded);
    assert_eq!(result.actions_for("Docs"), vec!["run: cargo +nightly doc"]);

    assert!(result.result.failed());
    assert_eq!(result.result.status(), ReportedStatus::Failed);
}

/// A step-level continue-on-error tolerates just that step
#[tokio::test]
async fn test_step_continue_on_error() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Step Tolerance"
jobs:
  - id: lint
    steps:
      - name: Audit
        run: cargo audit
        continue-on-error: true
      - name: Clippy
        run: cargo clippy
"#,
    );

    let executor = MockExecutor::new().failing_on("audit");
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_step_failed(&result, "lint", "lint", "Audit", "mock failure in Audit");
    assert_step_succeeded(&result, "lint", "lint", "Clippy");
    assert_instance_status(&result, "lint", "lint", JobStatus::FailedButTolerated);
    assert!(!result.result.failed());
}

/// With fail-fast, the first fatal failure cancels siblings that have not
/// started yet
#[tokio::test]
async fn test_fail_fast_cancels_siblings() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Fail Fast"
jobs:
  - id: build
    strategy:
      matrix:
        target: [bad, b, c]
    steps:
      - name: Build
        run: build ${{ target }}
      - name: Test
        run: test ${{ target }}
"#,
    );

    let executor = MockExecutor::new().failing_on("build bad");
    let result = run_pipeline_with(&pipeline, executor, SchedulingStrategy::Sequential, None)
        .await
        .unwrap();

    assert_instance_status(&result, "build", "build (bad)", JobStatus::FailedFatal);
    assert_instance_status(&result, "build", "build (b)", JobStatus::Cancelled);
    assert_instance_status(&result, "build", "build (c)", JobStatus::Cancelled);
    assert!(result.instance("build", "build (b)").steps.is_empty());
    assert_eq!(result.calls.len(), 1);

    // Cancelled instances report as failed
    assert_eq!(
        result.instance("build", "build (c)").reported_status(),
        ReportedStatus::Failed
    );
    assert!(result.result.failed());
}

/// Without fail-fast every sibling runs to completion
#[tokio::test]
async fn test_without_fail_fast_siblings_finish() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: No Fail Fast"
jobs:
  - id: build
    strategy:
      fail-fast: false
      matrix:
        target: [bad, b, c]
    steps:
      - name: Build
        run: build ${{ target }}
      - name: Test
        run: test ${{ target }}
"#,
    );

    let executor = MockExecutor::new().failing_on("build bad");
    let result = run_pipeline_with(&pipeline, executor, SchedulingStrategy::Sequential, None)
        .await
        .unwrap();

    assert_instance_status(&result, "build", "build (bad)", JobStatus::FailedFatal);
    assert_instance_status(&result, "build", "build (b)", JobStatus::Succeeded);
    assert_instance_status(&result, "build", "build (c)", JobStatus::Succeeded);
    assert_eq!(result.actions_for("Test"), vec!["run: test b", "run: test c"]);
}

/// Tolerated failures never trigger fail-fast
#[tokio::test]
async fn test_tolerated_failure_does_not_cancel() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Tolerated Fail Fast"
jobs:
  - id: test
    continue-on-error: "toolchain == 'nightly'"
    strategy:
      matrix:
        toolchain: [nightly, stable, beta]
    steps:
      - run: cargo +${{ toolchain }} test
"#,
    );

    let executor = MockExecutor::new().failing_on("+nightly");
    let result = run_pipeline_with(&pipeline, executor, SchedulingStrategy::Sequential, None)
        .await
        .unwrap();

    assert_eq!(result.result.count(JobStatus::Cancelled), 0);
    assert_eq!(result.result.count(JobStatus::Succeeded), 2);
    assert_eq!(result.result.status(), ReportedStatus::FailedButTolerated);
}

/// The pipeline's `concurrency` bounds instances across the engine
#[tokio::test]
async fn test_pipeline_concurrency_limit() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Concurrency"
concurrency: 2
jobs:
  - id: build
    strategy:
      matrix:
        target: [a, b, c, d]
    steps:
      - run: build ${{ target }}
"#,
    );

    let executor = MockExecutor::new().with_delay(std::time::Duration::from_millis(10));
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    let running_at_once = result
        .events
        .iter()
        .scan(0i32, |running, event| {
            match event {
                ExecutionEvent::InstanceStarted { .. } => *running += 1,
                ExecutionEvent::InstanceCompleted { .. } => *running -= 1,
                _ => {}
            }
            Some(*running)
        })
        .max()
        .unwrap();
    assert!(running_at_once <= 2, "{} instances ran at once", running_at_once);
    assert_eq!(result.result.count(JobStatus::Succeeded), 4);
}

/// A panic inside one instance's action is that instance's failure alone
#[tokio::test]
async fn test_panicking_action_fails_only_its_instance() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Crash"
jobs:
  - id: build
    strategy:
      fail-fast: false
      matrix:
        toolchain: [nightly, stable, beta]
    steps:
      - name: Build
        run: cargo +${{ toolchain }} build
  - id: package
    needs: [build]
    steps:
      - name: Package
        run: cargo package
"#,
    );

    let executor = MockExecutor::new().on("+nightly", Reply::Panic("action crashed".to_string()));
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_instance_status(&result, "build", "build (nightly)", JobStatus::FailedFatal);
    assert_step_failed(&result, "build", "build (nightly)", "instance", "action crashed");
    assert_instance_status(&result, "build", "build (stable)", JobStatus::Succeeded);
    assert_instance_status(&result, "build", "build (beta)", JobStatus::Succeeded);

    assert_eq!(result.result.job("package").unwrap().status, JobOutcome::Skipped);
    assert_eq!(result.result.status(), ReportedStatus::Failed);
}
