//! matrix-ci - CI matrix orchestration and conditional step execution

pub mod action;
pub mod cli;
pub mod core;
pub mod coverage;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use action::{ActionClientConfig, ActionError, ActionExecutor, ActionOutput, DryRunActionClient, ShellActionClient};
pub use core::{Condition, ConfigError, JobInstance, JobStatus, MatrixExpander, MatrixSpec, Pipeline, ReportedStatus, Step};
pub use coverage::{CoverageReport, CoverageUploader, DirectoryUploader};
pub use execution::{ExecutionEngine, ExecutionEvent, PipelineResult, SchedulingStrategy};
