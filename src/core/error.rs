//! Error kinds raised while loading and running a pipeline

use thiserror::Error;

/// Malformed pipeline definition. Raised before any instance runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read pipeline file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pipeline YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Duplicate job ID: {0}")]
    DuplicateJob(String),

    #[error("Job '{job}' needs non-existent job '{needs}'")]
    UnknownDependency { job: String, needs: String },

    #[error("Cycle detected in job dependencies involving '{0}'")]
    DependencyCycle(String),

    #[error("Job '{job}' matrix axis '{axis}' has no values")]
    EmptyAxis { job: String, axis: String },

    #[error("Job '{job}' has an invalid matrix: {reason}")]
    InvalidMatrix { job: String, reason: String },

    #[error("Job '{job}' step '{step}' must set exactly one of `run` or `uses`")]
    InvalidAction { job: String, step: String },

    #[error("Invalid condition in {context}: {source}")]
    InvalidCondition {
        context: String,
        #[source]
        source: ParseError,
    },

    #[error("Job '{job}' continue-on-error policy failed: {source}")]
    Policy {
        job: String,
        #[source]
        source: EvalError,
    },
}

/// Condition text that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

/// Run-time evaluation failure. Treated as a step failure, never a skip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
}

/// Errors returned from a pipeline run as a whole
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}
