//! Test: Conditional Steps - per-instance `if:` gating

use crate::helpers::*;
use matrix_ci::core::{JobStatus, ReportedStatus};

/// The host-compatibility condition skips emscripten and runs musl
#[tokio::test]
async fn test_host_compat_condition() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Host Compat"
jobs:
  - id: test
    strategy:
      matrix:
        os: [L]
        target:
          - wasm32-unknown-emscripten
          - x86_64-unknown-linux-musl
    steps:
      - name: Build
        run: cargo build --target ${{ target }}
      - name: Run tests
        if: "os == 'L' AND (target starts-with 'x86_64-unknown-linux-' OR target starts-with 'i686-unknown-linux-')"
        run: cargo test --target ${{ target }}
"#,
    );

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();

    assert_step_succeeded(&result, "test", "test (L, wasm32-unknown-emscripten)", "Build");
    assert_step_skipped(&result, "test", "test (L, wasm32-unknown-emscripten)", "Run tests");
    assert_step_succeeded(&result, "test", "test (L, x86_64-unknown-linux-musl)", "Run tests");
    assert_eq!(
        result.actions_for("Run tests"),
        vec!["run: cargo test --target x86_64-unknown-linux-musl"]
    );

    // A skipped step is never a failure
    assert_instance_status(&result, "test", "test (L, wasm32-unknown-emscripten)", JobStatus::Succeeded);
    assert_eq!(result.result.status(), ReportedStatus::Succeeded);
}

/// Conditions can read `host.*` and variables exported by earlier steps
#[tokio::test]
async fn test_condition_sees_host_and_exports() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Host and Env"
jobs:
  - id: release
    steps:
      - name: Detect
        run: detect-version
      - name: Publish
        if: "env.CHANNEL == 'stable' && host.os == 'linux'"
        run: publish ${{ env.CHANNEL }}
      - name: Windows only
        if: "host.family == 'windows'"
        run: signtool
"#,
    );

    let executor = MockExecutor::new().on(
        "detect-version",
        Reply::Export("CHANNEL".to_string(), "stable".to_string()),
    );
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_step_succeeded(&result, "release", "release", "Publish");
    assert_step_skipped(&result, "release", "release", "Windows only");
    assert_eq!(result.actions_for("Publish"), vec!["run: publish stable"]);
    assert_eq!(
        result.instance("release", "release").env.get("CHANNEL").map(String::as_str),
        Some("stable")
    );
}

/// Exports stay within the instance that produced them
#[tokio::test]
async fn test_exports_do_not_leak_between_instances() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Export Isolation"
jobs:
  - id: build
    strategy:
      fail-fast: false
      matrix:
        toolchain: [stable, beta]
    steps:
      - name: Detect
        run: detect ${{ toolchain }}
      - name: Report
        if: "env.FOUND == 'yes'"
        run: report ${{ toolchain }}
"#,
    );

    let executor = MockExecutor::new().on("detect stable", Reply::Export("FOUND".to_string(), "yes".to_string()));
    let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();

    assert_step_succeeded(&result, "build", "build (stable)", "Report");
    assert_step_skipped(&result, "build", "build (beta)", "Report");
}

/// A condition naming an unbound variable fails that step at run time
#[tokio::test]
async fn test_undefined_variable_fails_step() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Undefined"
jobs:
  - id: build
    steps:
      - name: Gate
        if: "toolchain == 'nightly'"
        run: cargo build
      - name: After
        run: echo after
"#,
    );

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();

    assert_step_failed(&result, "build", "build", "Gate", "toolchain");
    assert!(result.step_state("build", "build", "After").is_none());
    assert_instance_status(&result, "build", "build", JobStatus::FailedFatal);
    assert!(result.calls.is_empty());
    assert!(result.result.failed());
}
