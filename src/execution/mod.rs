//! Pipeline execution engine

pub mod aggregator;
pub mod engine;
pub mod runner;
pub mod scheduler;

pub use aggregator::{CoverageOutcome, JobOutcome, JobReport, JobResult, PipelineResult, ResultAggregator};
pub use engine::{EventEmitter, EventHandler, ExecutionEngine, ExecutionEvent};
pub use runner::StepRunner;
pub use scheduler::{JobScheduler, SchedulingStrategy};
