//! Job scheduler - runs the instances of one job concurrently

use crate::{
    action::ActionExecutor,
    core::{Job, JobInstance, JobStatus},
    execution::{
        aggregator::JobResult,
        engine::{EventEmitter, ExecutionEvent},
        runner::StepRunner,
    },
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// Strategy for bounding concurrently running instances across the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// One instance at a time
    Sequential,

    /// As many as the pipeline's `concurrency` allows (unbounded if unset)
    Parallel,

    /// At most N instances at once, overriding the pipeline setting
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Parallel
    }
}

impl SchedulingStrategy {
    /// Number of permits for the shared limiter
    pub fn permits(&self, pipeline_concurrency: Option<usize>) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => pipeline_concurrency
                .map(|n| n.max(1))
                .unwrap_or(Semaphore::MAX_PERMITS),
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Runs job instances under the shared concurrency limiter
pub struct JobScheduler<A> {
    runner: Arc<StepRunner<A>>,
    limiter: Arc<Semaphore>,
}

impl<A> Clone for JobScheduler<A> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<A: ActionExecutor + 'static> JobScheduler<A> {
    pub fn new(runner: Arc<StepRunner<A>>, limiter: Arc<Semaphore>) -> Self {
        Self { runner, limiter }
    }

    /// Run every instance of `job` and return their results ordered by index.
    ///
    /// With fail-fast, the first fatal instance raises the job's cancellation
    /// flag: instances that have not started a step stop immediately and
    /// running ones stop after their current step. An instance whose task
    /// panics is reported on its own and never takes its siblings down.
    pub async fn run_job(
        &self,
        job: &Job,
        instances: Vec<JobInstance>,
        events: &EventEmitter,
    ) -> Vec<JobResult> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let job_limit = job.max_parallel.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let env = Arc::new(job.env.clone());

        info!(
            "Scheduling {} instances of job {} (fail-fast: {}, max-parallel: {:?})",
            instances.len(),
            job.id,
            job.fail_fast,
            job.max_parallel
        );

        let mut set = JoinSet::new();
        let mut spawned = HashMap::new();
        for instance in instances {
            let runner = self.runner.clone();
            let limiter = self.limiter.clone();
            let job_limit = job_limit.clone();
            let cancelled = cancelled.clone();
            let steps = job.steps.clone();
            let env = env.clone();
            let events = events.clone();
            let fail_fast = job.fail_fast;
            let tracked = instance.clone();

            let handle = set.spawn(async move {
                let _job_permit = match job_limit {
                    Some(limit) => match limit.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return JobResult::crashed(instance, "concurrency limiter closed"),
                    },
                    None => None,
                };
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return JobResult::crashed(instance, "concurrency limiter closed");
                };

                let result = runner
                    .run_instance(instance, &env, &steps, &cancelled, &events)
                    .await;

                if fail_fast && result.status == JobStatus::FailedFatal {
                    debug!("Fail-fast: cancelling siblings of {}", result.instance.display_name());
                    cancelled.store(true, Ordering::SeqCst);
                }
                result
            });
            spawned.insert(handle.id(), tracked);
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next_with_id().await {
            let result = match joined {
                Ok((id, result)) => {
                    spawned.remove(&id);
                    result
                }
                Err(e) => {
                    let Some(instance) = spawned.remove(&e.id()) else {
                        continue;
                    };
                    let name = instance.display_name();
                    let message = task_failure(e);
                    error!("Instance {} crashed: {}", name, message);

                    let result = JobResult::crashed(instance, format!("instance task panicked: {}", message));
                    if job.fail_fast && result.status == JobStatus::FailedFatal {
                        cancelled.store(true, Ordering::SeqCst);
                    }
                    events.emit(ExecutionEvent::InstanceCompleted {
                        instance: name,
                        status: result.status,
                    });
                    result
                }
            };
            results.push(result);
        }

        results.sort_by_key(|r| r.instance.index);
        results
    }
}

/// Panic payload or cancellation reason of a task that did not return
pub(crate) fn task_failure(error: JoinError) -> String {
    if error.is_cancelled() {
        return "task was cancelled".to_string();
    }
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string()),
        Err(e) => e.to_string(),
    }
}
