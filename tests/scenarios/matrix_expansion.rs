//! Test: Matrix Expansion - cross product, include/exclude and per-instance tolerance

use crate::helpers::*;
use matrix_ci::core::JobStatus;

/// Two axes of two values give four instances in axis order; the nightly
/// ones are marked tolerant
#[tokio::test]
async fn test_cross_product_with_nightly_tolerance() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Cross Product"
jobs:
  - id: test
    continue-on-error: "toolchain == 'nightly'"
    strategy:
      matrix:
        toolchain: [stable, nightly]
        target: [A, B]
    steps:
      - name: Test
        run: cargo +${{ matrix.toolchain }} test --target ${{ matrix.target }}
"#,
    );

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();
    let report = result.result.job("test").unwrap();

    let names: Vec<String> = report.instances.iter().map(|r| r.instance.display_name()).collect();
    assert_eq!(
        names,
        vec!["test (stable, A)", "test (stable, B)", "test (nightly, A)", "test (nightly, B)"]
    );

    let tolerant: Vec<bool> = report.instances.iter().map(|r| r.instance.continue_on_error).collect();
    assert_eq!(tolerant, vec![false, false, true, true]);

    let mut actions = result.actions_for("Test");
    actions.sort();
    assert_eq!(
        actions,
        vec![
            "run: cargo +nightly test --target A",
            "run: cargo +nightly test --target B",
            "run: cargo +stable test --target A",
            "run: cargo +stable test --target B",
        ]
    );
}

/// An include that matches no base combination adds one instance; axes it
/// does not name are null
#[tokio::test]
async fn test_include_adds_instance() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Include"
jobs:
  - id: build
    strategy:
      matrix:
        target: [A, B]
        os: [L]
        include:
          - target: C
            os: M
            toolchain: stable
    steps:
      - run: build ${{ target }} on ${{ os }}
"#,
    );

    let instances = pipeline.job("build").unwrap().expand(&linux_host()).unwrap();
    assert_eq!(instances.len(), 3);

    let added = &instances[2];
    assert_eq!(added.value("target"), Some("C"));
    assert_eq!(added.value("os"), Some("M"));
    assert_eq!(added.value("toolchain"), Some("stable"));
    assert_eq!(instances[0].value("toolchain"), None);

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();
    assert_eq!(result.result.count(JobStatus::Succeeded), 3);
    assert!(result.actions_for("step 1").contains(&"run: build C on M".to_string()));
}

/// An include agreeing with existing combinations merges into them without
/// changing the count
#[tokio::test]
async fn test_matching_include_merges() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Include Merge"
jobs:
  - id: build
    strategy:
      matrix:
        toolchain: [stable, nightly]
        target: [A, B]
        include:
          - toolchain: nightly
            flags: "-Zbuild-std"
    steps:
      - run: cargo build ${{ flags }}
        if: "toolchain == 'nightly'"
"#,
    );

    let instances = pipeline.job("build").unwrap().expand(&linux_host()).unwrap();
    assert_eq!(instances.len(), 4);
    let flagged: Vec<usize> = instances
        .iter()
        .filter(|i| i.value("flags") == Some("-Zbuild-std"))
        .map(|i| i.index)
        .collect();
    assert_eq!(flagged, vec![2, 3]);

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();
    assert_eq!(result.calls.len(), 2);
    assert_step_skipped(&result, "build", "build (stable, A)", "step 1");
}

/// Excluded combinations never run
#[tokio::test]
async fn test_exclude_removes_combinations() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Exclude"
jobs:
  - id: build
    strategy:
      matrix:
        os: [linux, windows]
        target: [gnu, msvc]
        exclude:
          - os: linux
            target: msvc
    steps:
      - run: build ${{ os }}-${{ target }}
"#,
    );

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();
    let names: Vec<String> = result
        .result
        .instances()
        .map(|r| r.instance.display_name())
        .collect();
    assert_eq!(
        names,
        vec!["build (linux, gnu)", "build (windows, gnu)", "build (windows, msvc)"]
    );
}

/// Matrix values reach the action as MATRIX_* variables next to job env
#[tokio::test]
async fn test_matrix_values_exported_to_env() {
    let pipeline = pipeline_from_yaml(
        r#"
name: "Test: Env"
env:
  CARGO_TERM_COLOR: always
jobs:
  - id: test
    env:
      RUST_BACKTRACE: "1"
    strategy:
      matrix:
        toolchain: [stable]
    steps:
      - name: Test
        run: cargo test
        env:
          LABEL: "${{ job }}-${{ toolchain }}"
"#,
    );

    let result = run_pipeline_with_mock(&pipeline, MockExecutor::new()).await.unwrap();
    let call = &result.calls[0].call;
    assert_eq!(call.env.get("MATRIX_TOOLCHAIN").map(String::as_str), Some("stable"));
    assert_eq!(call.env.get("CARGO_TERM_COLOR").map(String::as_str), Some("always"));
    assert_eq!(call.env.get("RUST_BACKTRACE").map(String::as_str), Some("1"));
    assert_eq!(call.env.get("LABEL").map(String::as_str), Some("test-stable"));
}
