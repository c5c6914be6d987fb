//! Step runner - executes the steps of one job instance in order

use crate::{
    action::{ActionCall, ActionError, ActionExecutor},
    core::{
        ActionRef, EvalError, HostInfo, InstanceContext, JobInstance, JobStatus, Step, StepResult,
        StepState,
    },
    execution::{
        aggregator::JobResult,
        engine::{EventEmitter, ExecutionEvent},
    },
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a step failed
#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Runs instances against an action executor
pub struct StepRunner<A> {
    executor: Arc<A>,
    host: HostInfo,
}

impl<A: ActionExecutor> StepRunner<A> {
    pub fn new(executor: Arc<A>, host: HostInfo) -> Self {
        Self { executor, host }
    }

    /// Run every step of an instance, strictly in order.
    ///
    /// `cancelled` is checked before each step; once raised, the instance
    /// stops with `Cancelled` and no further StepResults are recorded.
    pub async fn run_instance(
        &self,
        instance: JobInstance,
        job_env: &HashMap<String, String>,
        steps: &[Step],
        cancelled: &AtomicBool,
        events: &EventEmitter,
    ) -> JobResult {
        let name = instance.display_name();
        let tolerant = instance.continue_on_error;
        let mut ctx = InstanceContext::new(instance, job_env, self.host.clone());
        let mut status = JobStatus::Succeeded;
        let mut results = Vec::with_capacity(steps.len());
        let mut coverage_reports = Vec::new();
        let mut missing_coverage = Vec::new();

        info!("Starting instance: {}", name);
        events.emit(ExecutionEvent::InstanceStarted {
            instance: name.clone(),
        });

        for step in steps {
            if cancelled.load(Ordering::SeqCst) {
                info!("Instance {} cancelled before step '{}'", name, step.name);
                status = JobStatus::Cancelled;
                break;
            }

            let gate = match &step.condition {
                Some(condition) => condition.evaluate(&ctx),
                None => Ok(true),
            };

            let started_at = Utc::now();
            let outcome = match gate {
                Ok(false) => {
                    debug!("Instance {}: condition of '{}' is false", name, step.name);
                    let state = StepState::Skipped {
                        reason: match &step.condition {
                            Some(condition) => format!("condition `{}` is false", condition),
                            None => "condition is false".to_string(),
                        },
                    };
                    self.record(events, &name, &mut results, step, state);
                    continue;
                }
                Ok(true) => {
                    events.emit(ExecutionEvent::StepStarted {
                        instance: name.clone(),
                        step: step.name.clone(),
                    });
                    self.invoke(&ctx, step).await
                }
                Err(e) => Err(StepError::from(e)),
            };

            match outcome {
                Ok(output) => {
                    ctx.apply_exports(&output.exports);
                    coverage_reports.extend(output.coverage);
                    missing_coverage.extend(output.missing_coverage);
                    let state = StepState::Succeeded {
                        output: output.output,
                        started_at,
                        completed_at: Utc::now(),
                    };
                    self.record(events, &name, &mut results, step, state);
                }
                Err(e) => {
                    let tolerated = tolerant || step.continue_on_error;
                    warn!(
                        "Instance {}: step '{}' failed{}: {}",
                        name,
                        step.name,
                        if tolerated { " (tolerated)" } else { "" },
                        e
                    );
                    let state = StepState::Failed {
                        error: e.to_string(),
                        tolerated,
                        started_at,
                        failed_at: Utc::now(),
                    };
                    self.record(events, &name, &mut results, step, state);

                    if !tolerated {
                        status = JobStatus::FailedFatal;
                        break;
                    }
                    status = JobStatus::FailedButTolerated;
                }
            }
        }

        info!("Instance {} finished: {}", name, status.as_str());
        events.emit(ExecutionEvent::InstanceCompleted {
            instance: name,
            status,
        });

        JobResult {
            instance: ctx.instance,
            status,
            steps: results,
            coverage_reports,
            missing_coverage,
            env: ctx.env,
        }
    }

    /// Render the step for this instance and call the executor
    async fn invoke(&self, ctx: &InstanceContext, step: &Step) -> Result<crate::action::ActionOutput, StepError> {
        let action = match &step.action {
            ActionRef::Shell { command } => ActionRef::Shell {
                command: ctx.render(command)?,
            },
            ActionRef::Uses(name) => ActionRef::Uses(ctx.render(name)?),
        };
        let params = ctx.render_map(&step.params)?;
        let step_env = ctx.render_map(&step.env)?;

        let call = ActionCall {
            step: step.name.clone(),
            action,
            params,
            env: ctx.step_env(&step_env),
            timeout_secs: step.timeout_secs,
        };

        debug!("Invoking {} for step '{}'", call.action, call.step);
        Ok(self.executor.execute(&call).await?)
    }

    fn record(
        &self,
        events: &EventEmitter,
        instance: &str,
        results: &mut Vec<StepResult>,
        step: &Step,
        state: StepState,
    ) {
        events.emit(ExecutionEvent::StepFinished {
            instance: instance.to_string(),
            step: step.name.clone(),
            state: state.clone(),
        });
        results.push(StepResult {
            name: step.name.clone(),
            state,
        });
    }
}
