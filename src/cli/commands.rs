//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Pipeline environment overrides (KEY=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Maximum instances running at once across all jobs
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Log each step instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Fail steps that use a named action with no handler
    #[arg(long)]
    pub strict: bool,

    /// Working directory for shell steps
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Write merged coverage to this directory
    #[arg(long)]
    pub coverage_dir: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    /// Scheduling strategy after applying `--concurrency`
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match (self.strategy, self.concurrency) {
            (SchedulingStrategyArg::Sequential, _) => SchedulingStrategy::Sequential,
            (_, Some(n)) => SchedulingStrategy::LimitedParallel(n),
            (SchedulingStrategyArg::Limited, None) => SchedulingStrategy::LimitedParallel(4),
            (SchedulingStrategyArg::Parallel, None) => SchedulingStrategy::Parallel,
        }
    }
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print expanded matrices
#[derive(Debug, Args, Clone)]
pub struct ExpandCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Only this job
    #[arg(long)]
    pub job: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run by ID
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    Limited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid KEY=value pair: {}", s)),
    }
}
