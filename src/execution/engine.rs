//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    action::ActionExecutor,
    core::{ExecutionStatus, HostInfo, JobStatus, Pipeline, PipelineError, PipelineState, StepState},
    coverage::CoverageUploader,
    execution::{
        aggregator::{CoverageOutcome, JobOutcome, JobReport, PipelineResult, ResultAggregator},
        runner::StepRunner,
        scheduler::{task_failure, JobScheduler, SchedulingStrategy},
    },
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_instances: usize,
    },
    JobStarted {
        job: String,
        instances: usize,
    },
    JobSkipped {
        job: String,
        reason: String,
    },
    InstanceStarted {
        instance: String,
    },
    StepStarted {
        instance: String,
        step: String,
    },
    StepFinished {
        instance: String,
        step: String,
        state: StepState,
    },
    InstanceCompleted {
        instance: String,
        status: JobStatus,
    },
    CoverageProcessed {
        job: String,
        outcome: CoverageOutcome,
    },
    JobCompleted {
        job: String,
        status: JobOutcome,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Snapshot of the registered handlers, cheap to clone into tasks
#[derive(Clone)]
pub struct EventEmitter {
    handlers: Arc<[EventHandler]>,
}

impl EventEmitter {
    pub fn new(handlers: Vec<EventHandler>) -> Self {
        Self {
            handlers: handlers.into(),
        }
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<A> {
    executor: Arc<A>,
    strategy: SchedulingStrategy,
    host: HostInfo,
    uploader: Option<Arc<dyn CoverageUploader>>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl<A: ActionExecutor + 'static> ExecutionEngine<A> {
    pub fn new(executor: A, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(executor),
            strategy,
            host: HostInfo::current(),
            uploader: None,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Evaluate `host.*` against a different host description
    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    /// Send merged coverage to this uploader
    pub fn with_uploader(mut self, uploader: Arc<dyn CoverageUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(handler));
    }

    fn emitter(&self) -> EventEmitter {
        let handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        EventEmitter::new(handlers)
    }

    /// Execute the entire pipeline.
    ///
    /// Every job's matrix is expanded before anything runs, so a definition
    /// error returns `PipelineError::Config` without executing a step.
    pub async fn execute(&self, pipeline: &Pipeline) -> Result<PipelineResult, PipelineError> {
        let events = self.emitter();
        let mut state = PipelineState::new();
        let execution_id = state.execution_id;

        let mut expanded: HashMap<String, _> = pipeline
            .expand_all(&self.host)?
            .into_iter()
            .map(|(job, instances)| (job.id.clone(), instances))
            .collect();
        let total_instances: usize = expanded.values().map(Vec::len).sum();

        info!("Starting pipeline execution: {} ({})", pipeline.name, execution_id);
        events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            total_instances,
        });
        state.start(total_instances);
        let started_at = Utc::now();

        let permits = self.strategy.permits(pipeline.concurrency);
        let runner = Arc::new(StepRunner::new(self.executor.clone(), self.host.clone()));
        let scheduler = JobScheduler::new(runner, Arc::new(Semaphore::new(permits)));
        let aggregator = ResultAggregator::new(self.uploader.clone());

        let mut pending: Vec<_> = pipeline
            .execution_order()
            .iter()
            .filter_map(|id| pipeline.job(id))
            .collect();
        let mut finished: HashMap<String, JobOutcome> = HashMap::new();
        let mut reports: HashMap<String, JobReport> = HashMap::new();
        let mut set = JoinSet::new();
        let mut running = HashMap::new();

        loop {
            // Start every job whose needs have all finished
            while let Some(pos) = pending
                .iter()
                .position(|job| job.needs.iter().all(|n| finished.contains_key(n)))
            {
                let job = pending.remove(pos);

                if let Some(blocker) = job.needs.iter().find(|n| finished[*n].blocks_dependents()) {
                    let reason = format!("needed job '{}' did not succeed", blocker);
                    warn!("Skipping job {}: {}", job.id, reason);
                    events.emit(ExecutionEvent::JobSkipped {
                        job: job.id.clone(),
                        reason: reason.clone(),
                    });
                    finished.insert(job.id.clone(), JobOutcome::Skipped);
                    reports.insert(job.id.clone(), JobReport::skipped(job, reason));
                    continue;
                }

                let instances = expanded.remove(&job.id).unwrap_or_default();
                info!("Starting job {} with {} instances", job.id, instances.len());
                events.emit(ExecutionEvent::JobStarted {
                    job: job.id.clone(),
                    instances: instances.len(),
                });

                let job = job.clone();
                let scheduler = scheduler.clone();
                let aggregator = aggregator.clone();
                let events = events.clone();
                let handle = set.spawn({
                    let job = job.clone();
                    async move {
                        let results = scheduler.run_job(&job, instances, &events).await;
                        aggregator.job_report(&job, results).await
                    }
                });
                running.insert(handle.id(), job);
            }

            let Some(joined) = set.join_next_with_id().await else {
                break;
            };
            let report = match joined {
                Ok((id, report)) => {
                    running.remove(&id);
                    report
                }
                Err(e) => {
                    let Some(job) = running.remove(&e.id()) else {
                        continue;
                    };
                    let message = task_failure(e);
                    error!("Job {} crashed: {}", job.id, message);
                    JobReport::crashed(&job, format!("job task panicked: {}", message))
                }
            };

            for result in &report.instances {
                state.record(result.status);
            }
            debug!(
                "Pipeline {}: {:.0}% of instances finished, {} failed",
                pipeline.name,
                state.progress() * 100.0,
                state.failed_instances
            );
            if let Some(outcome) = &report.coverage {
                events.emit(ExecutionEvent::CoverageProcessed {
                    job: report.job.clone(),
                    outcome: outcome.clone(),
                });
            }
            info!("Job {} finished: {:?}", report.job, report.status);
            events.emit(ExecutionEvent::JobCompleted {
                job: report.job.clone(),
                status: report.status,
            });

            finished.insert(report.job.clone(), report.status);
            reports.insert(report.job.clone(), report);
        }

        let jobs = pipeline
            .execution_order()
            .iter()
            .filter_map(|id| reports.remove(id))
            .collect();

        let result = PipelineResult {
            execution_id,
            pipeline: pipeline.name.clone(),
            jobs,
            started_at,
            completed_at: Utc::now(),
        };

        if result.failed() {
            state.fail();
        } else {
            state.complete();
        }

        info!(
            "Pipeline execution finished: {} - {}",
            pipeline.name,
            result.status().as_str()
        );
        events.emit(ExecutionEvent::PipelineCompleted {
            execution_id,
            status: state.status,
        });

        Ok(result)
    }
}
