//! Pipeline domain model

use crate::core::{
    condition::Condition,
    config::{ContinueOnError, CoverageConfig, PipelineConfig},
    context::{HostInfo, VariableScope},
    error::ConfigError,
    matrix::{JobInstance, MatrixExpander, MatrixSpec},
    step::{Step, StepDefaults},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Engine-wide instance limit declared by the pipeline
    pub concurrency: Option<usize>,

    /// Pipeline jobs in declaration order
    pub jobs: Vec<Job>,

    /// Job execution order (topological sort over `needs`)
    execution_order: Vec<String>,
}

/// Instance-level failure tolerance
#[derive(Debug, Clone)]
pub enum FailurePolicy {
    Always(bool),
    When(Condition),
}

/// A job: a matrix plus the steps every instance runs
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    pub name: String,

    /// Jobs that must finish first
    pub needs: Vec<String>,

    /// Job environment, pipeline env already merged in
    pub env: HashMap<String, String>,

    pub matrix: MatrixSpec,

    /// Cancel siblings after the first fatal failure
    pub fail_fast: bool,

    /// Maximum concurrently running instances of this job
    pub max_parallel: Option<usize>,

    /// Whether an instance may fail without failing the pipeline
    pub continue_on_error: FailurePolicy,

    /// Steps shared read-only by every instance
    pub steps: Arc<[Step]>,

    /// Coverage merging settings, if the job produces coverage
    pub coverage: Option<CoverageConfig>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let jobs = config
            .jobs
            .iter()
            .map(|job_config| {
                let defaults = StepDefaults {
                    timeout_secs: job_config
                        .timeout_secs
                        .or(config.default_timeout_secs)
                        .unwrap_or(StepDefaults::default().timeout_secs),
                };

                let steps = job_config
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(index, step)| Step::from_config(&job_config.id, index, step, &defaults))
                    .collect::<Result<Vec<_>, _>>()?;

                let continue_on_error = match job_config.continue_on_error_condition()? {
                    Some(condition) => FailurePolicy::When(condition),
                    None => FailurePolicy::Always(matches!(
                        job_config.continue_on_error,
                        ContinueOnError::Flag(true)
                    )),
                };

                let mut env = config.env.clone();
                env.extend(job_config.env.clone());

                Ok::<_, ConfigError>(Job {
                    id: job_config.id.clone(),
                    name: job_config.name.clone().unwrap_or_else(|| job_config.id.clone()),
                    needs: job_config.needs.clone(),
                    env,
                    matrix: job_config.matrix_spec()?,
                    fail_fast: job_config.strategy.fail_fast,
                    max_parallel: job_config.strategy.max_parallel,
                    continue_on_error,
                    steps: steps.into(),
                    coverage: job_config.coverage.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let execution_order = Self::topological_sort(&jobs);

        Ok(Pipeline {
            name: config.name.clone(),
            concurrency: config.concurrency,
            jobs,
            execution_order,
        })
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Expand every job's matrix, in execution order
    pub fn expand_all(&self, host: &HostInfo) -> Result<Vec<(&Job, Vec<JobInstance>)>, ConfigError> {
        self.execution_order
            .iter()
            .filter_map(|id| self.job(id))
            .map(|job| Ok((job, job.expand(host)?)))
            .collect()
    }

    /// Calculate topological sort of jobs based on `needs`.
    /// Ties keep declaration order.
    fn topological_sort(jobs: &[Job]) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for job in jobs {
            Self::visit(&job.id, jobs, &mut visited, &mut result);
        }

        result
    }

    fn visit(job_id: &str, jobs: &[Job], visited: &mut HashSet<String>, result: &mut Vec<String>) {
        if !visited.insert(job_id.to_string()) {
            return;
        }

        if let Some(job) = jobs.iter().find(|j| j.id == job_id) {
            for dep in &job.needs {
                Self::visit(dep, jobs, visited, result);
            }
        }

        result.push(job_id.to_string());
    }
}

impl Job {
    /// Resolve the job's matrix into instances
    pub fn expand(&self, host: &HostInfo) -> Result<Vec<JobInstance>, ConfigError> {
        MatrixExpander::new().expand(&self.id, &self.matrix, |bindings| match &self.continue_on_error {
            FailurePolicy::Always(flag) => Ok(*flag),
            FailurePolicy::When(condition) => condition.evaluate(&VariableScope {
                job: &self.id,
                bindings,
                env: &self.env,
                host,
            }),
        })
    }
}
