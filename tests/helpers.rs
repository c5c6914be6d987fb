//! Test utilities for matrix-ci scenarios

use async_trait::async_trait;
use matrix_ci::action::{ActionCall, ActionError, ActionExecutor, ActionOutput};
use matrix_ci::core::{config::PipelineConfig, HostInfo, JobStatus, Pipeline, PipelineError, StepState};
use matrix_ci::coverage::{CoverageReport, CoverageUploader, MergeError, UploadMetadata};
use matrix_ci::execution::{ExecutionEngine, ExecutionEvent, JobResult, PipelineResult, SchedulingStrategy};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock does when a rendered action matches a rule
#[derive(Debug, Clone)]
pub enum Reply {
    Output(String),
    Fail(i32),
    Export(String, String),
    Coverage(String),
    /// Action ran but its requested coverage report could not be read
    MissingCoverage(String),
    Panic(String),
}

/// A call the mock received, after rendering
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub step: String,
    pub action: String,
    pub call: ActionCall,
}

/// Mock executor answering by substring rules over the rendered action
#[derive(Clone, Default)]
pub struct MockExecutor {
    rules: Vec<(String, Reply)>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    delay: Option<Duration>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer actions containing `pattern` with `reply`. First match wins.
    pub fn on(mut self, pattern: &str, reply: Reply) -> Self {
        self.rules.push((pattern.to_string(), reply));
        self
    }

    pub fn failing_on(self, pattern: &str) -> Self {
        self.on(pattern, Reply::Fail(1))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, call: &ActionCall) -> Result<ActionOutput, ActionError> {
        let action = call.action.to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            step: call.step.clone(),
            action: action.clone(),
            call: call.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(pattern, _)| action.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            None => Ok(ActionOutput::new("ok")),
            Some(Reply::Output(text)) => Ok(ActionOutput::new(text)),
            Some(Reply::Fail(code)) => Err(ActionError::Failed {
                code,
                stderr: format!("mock failure in {}", call.step),
            }),
            Some(Reply::Export(key, value)) => Ok(ActionOutput::new("").with_export(key, value)),
            Some(Reply::Coverage(lcov)) => Ok(ActionOutput::new("").with_coverage(lcov)),
            Some(Reply::MissingCoverage(report)) => Ok(ActionOutput {
                missing_coverage: Some(report),
                ..Default::default()
            }),
            Some(Reply::Panic(message)) => panic!("{}", message),
        }
    }
}

/// Uploader that keeps what it was given
#[derive(Clone, Default)]
pub struct RecordingUploader {
    pub uploads: Arc<Mutex<Vec<(CoverageReport, UploadMetadata)>>>,
    pub fail: bool,
}

#[async_trait]
impl CoverageUploader for RecordingUploader {
    async fn upload(&self, report: &CoverageReport, metadata: &UploadMetadata) -> Result<(), MergeError> {
        if self.fail {
            return Err(MergeError::Upload("service unavailable".to_string()));
        }
        self.uploads.lock().unwrap().push((report.clone(), metadata.clone()));
        Ok(())
    }
}

/// Test result from running a pipeline
#[derive(Debug, Clone)]
pub struct PipelineTestResult {
    pub result: PipelineResult,
    pub calls: Vec<RecordedCall>,
    pub events: Vec<ExecutionEvent>,
}

impl PipelineTestResult {
    /// Instance of `job` whose display name is `name`
    pub fn instance(&self, job: &str, name: &str) -> &JobResult {
        let report = self
            .result
            .job(job)
            .unwrap_or_else(|| panic!("Job '{}' not found in result", job));
        report
            .instances
            .iter()
            .find(|r| r.instance.display_name() == name)
            .unwrap_or_else(|| {
                let names: Vec<String> = report.instances.iter().map(|r| r.instance.display_name()).collect();
                panic!("Instance '{}' not found, have {:?}", name, names)
            })
    }

    pub fn step_state(&self, job: &str, instance: &str, step: &str) -> Option<&StepState> {
        self.instance(job, instance)
            .steps
            .iter()
            .find(|s| s.name == step)
            .map(|s| &s.state)
    }

    /// Rendered actions received for one instance's step
    pub fn actions_for(&self, step: &str) -> Vec<String> {
        self.calls
            .iter()
            .filter(|c| c.step == step)
            .map(|c| c.action.clone())
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {} ok, {} tolerated, {} failed, {} cancelled",
            self.result.status().as_str(),
            self.result.count(JobStatus::Succeeded),
            self.result.count(JobStatus::FailedButTolerated),
            self.result.count(JobStatus::FailedFatal),
            self.result.count(JobStatus::Cancelled)
        )
    }
}

/// Host used by every scenario so `host.*` conditions are deterministic
pub fn linux_host() -> HostInfo {
    HostInfo {
        os: "linux".to_string(),
        arch: "x86_64".to_string(),
        family: "unix".to_string(),
    }
}

/// Parse a pipeline from YAML string
pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .and_then(|config| config.to_pipeline())
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e))
}

/// Run a pipeline with the mock executor
pub async fn run_pipeline_with_mock(
    pipeline: &Pipeline,
    executor: MockExecutor,
) -> Result<PipelineTestResult, PipelineError> {
    run_pipeline_with(pipeline, executor, SchedulingStrategy::Parallel, None).await
}

/// Run a pipeline with full control over strategy and uploader
pub async fn run_pipeline_with(
    pipeline: &Pipeline,
    executor: MockExecutor,
    strategy: SchedulingStrategy,
    uploader: Option<Arc<dyn CoverageUploader>>,
) -> Result<PipelineTestResult, PipelineError> {
    let mut engine = ExecutionEngine::new(executor.clone(), strategy).with_host(linux_host());
    if let Some(uploader) = uploader {
        engine = engine.with_uploader(uploader);
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    let result = engine.execute(pipeline).await?;
    let events = events.lock().unwrap().clone();

    Ok(PipelineTestResult {
        result,
        calls: executor.calls(),
        events,
    })
}

/// Assert the status of one instance
pub fn assert_instance_status(result: &PipelineTestResult, job: &str, instance: &str, expected: JobStatus) {
    let actual = result.instance(job, instance).status;
    assert_eq!(
        actual, expected,
        "Instance '{}' should be {:?}, but was {:?} ({})",
        instance,
        expected,
        actual,
        result.summary()
    );
}

/// Assert a step of an instance was skipped by its condition
pub fn assert_step_skipped(result: &PipelineTestResult, job: &str, instance: &str, step: &str) {
    let state = result.step_state(job, instance, step);
    assert!(
        matches!(state, Some(StepState::Skipped { .. })),
        "Step '{}' of '{}' should be skipped, but was {:?}",
        step,
        instance,
        state
    );
}

/// Assert a step of an instance ran successfully
pub fn assert_step_succeeded(result: &PipelineTestResult, job: &str, instance: &str, step: &str) {
    let state = result.step_state(job, instance, step);
    assert!(
        matches!(state, Some(StepState::Succeeded { .. })),
        "Step '{}' of '{}' should have succeeded, but was {:?}",
        step,
        instance,
        state
    );
}

/// Assert a step of an instance failed with a message containing `expected_error`
pub fn assert_step_failed(result: &PipelineTestResult, job: &str, instance: &str, step: &str, expected_error: &str) {
    match result.step_state(job, instance, step) {
        Some(StepState::Failed { error, .. }) => assert!(
            error.contains(expected_error),
            "Step '{}' error:\n{}\n\ndoes not contain:\n{}",
            step,
            error,
            expected_error
        ),
        other => panic!("Step '{}' of '{}' should have failed, but was {:?}", step, instance, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_rules_first_match_wins() {
        let executor = MockExecutor::new()
            .on("cargo test", Reply::Output("tests passed".to_string()))
            .failing_on("cargo");
        let pipeline = pipeline_from_yaml(
            r#"
name: "Mock"
jobs:
  - id: build
    steps:
      - name: Test
        run: cargo test
"#,
        );

        let result = run_pipeline_with_mock(&pipeline, executor).await.unwrap();
        assert_instance_status(&result, "build", "build", JobStatus::Succeeded);
        assert_eq!(result.actions_for("Test"), vec!["run: cargo test".to_string()]);
    }
}
