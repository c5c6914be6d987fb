use anyhow::{Context, Result};
use matrix_ci::action::{ActionClientConfig, ActionExecutor, DryRunActionClient, ShellActionClient};
use matrix_ci::cli::commands::{ExpandCommand, HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use matrix_ci::cli::output::*;
use matrix_ci::cli::{Cli, Command};
use matrix_ci::core::{config::PipelineConfig, HostInfo, Pipeline};
use matrix_ci::coverage::DirectoryUploader;
use matrix_ci::execution::{ExecutionEngine, ExecutionEvent, PipelineResult};
use matrix_ci::persistence::{create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "matrix_ci=debug" } else { "matrix_ci=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Expand(cmd) => expand_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn load_config(file: &str) -> Result<PipelineConfig> {
    PipelineConfig::from_file(file).with_context(|| format!("Failed to load pipeline config {}", file))
}

async fn open_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
    history_store().await
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    let store = matrix_ci::persistence::SqliteExecutionStore::with_default_path()
        .await
        .context("Failed to open run history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<()> {
    let mut config = load_config(&cmd.file)?;

    if !cmd.json {
        println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
        for (key, value) in &cmd.var {
            println!(
                "{} Variable override: {} = {}",
                INFO,
                style(key).cyan(),
                style(value).dim()
            );
        }
    }
    config.apply_env_overrides(cmd.var.iter().cloned());

    let pipeline = config.to_pipeline().context("Invalid pipeline")?;
    let store = open_store(cmd.no_history).await?;

    let result = if cmd.dry_run {
        execute(DryRunActionClient::new(), cmd, &pipeline, verbose).await?
    } else {
        let mut client_config = ActionClientConfig::new().strict(cmd.strict);
        if let Some(dir) = &cmd.workdir {
            client_config = client_config.with_working_dir(dir);
        }
        execute(ShellActionClient::new(client_config), cmd, &pipeline, verbose).await?
    };

    if !cmd.no_history {
        let summary = create_summary(&result);
        store.save_execution(&summary).await?;
        if !cmd.json {
            println!(
                "{} Run saved to history (ID: {})",
                INFO,
                style(&summary.execution_id.to_string()[..8]).dim()
            );
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("\n{}", format_pipeline_result(&result));
    }

    if result.failed() {
        error!("Pipeline {} failed", pipeline.name);
        std::process::exit(1);
    }

    Ok(())
}

async fn execute<A: ActionExecutor + 'static>(
    executor: A,
    cmd: &RunCommand,
    pipeline: &Pipeline,
    verbose: bool,
) -> Result<PipelineResult> {
    let mut engine = ExecutionEngine::new(executor, cmd.scheduling_strategy());
    if let Some(dir) = &cmd.coverage_dir {
        engine = engine.with_uploader(Arc::new(DirectoryUploader::new(dir)));
    }

    let progress = (!cmd.json).then(|| create_progress_bar(0));
    if let Some(bar) = progress.clone() {
        engine.add_event_handler(move |event| {
            match &event {
                ExecutionEvent::PipelineStarted { total_instances, .. } => {
                    bar.set_length(*total_instances as u64)
                }
                ExecutionEvent::InstanceCompleted { instance, .. } => {
                    bar.inc(1);
                    bar.set_message(instance.clone());
                }
                _ => {}
            }
            if let Some(line) = format_execution_event(&event, verbose) {
                bar.println(line);
            }
        });
    }

    let result = engine.execute(pipeline).await;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    Ok(result?)
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let checked = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let pipeline = config.to_pipeline()?;
        let counts: Vec<(String, usize)> = pipeline
            .expand_all(&HostInfo::current())?
            .into_iter()
            .map(|(job, instances)| (job.id.clone(), instances.len()))
            .collect();
        Ok((config, counts))
    });

    match checked {
        Ok((config, counts)) => {
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            for (job, count) in &counts {
                println!("    {} ({} instances)", style(job).bold(), style(count).cyan());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(e).red());
            std::process::exit(1);
        }
    }
}

fn expand_pipeline(cmd: &ExpandCommand) -> Result<()> {
    let pipeline = load_config(&cmd.file)?.to_pipeline()?;
    let host = HostInfo::current();

    let expanded: Vec<_> = pipeline
        .expand_all(&host)?
        .into_iter()
        .filter(|(job, _)| cmd.job.as_ref().map_or(true, |id| &job.id == id))
        .collect();

    if let Some(id) = &cmd.job {
        if expanded.is_empty() {
            anyhow::bail!("No job named '{}'", id);
        }
    }

    if cmd.json {
        let jobs: Vec<_> = expanded
            .iter()
            .map(|(job, instances)| serde_json::json!({ "job": job.id, "instances": instances }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "jobs": jobs }))?);
        return Ok(());
    }

    for (job, instances) in &expanded {
        println!(
            "{} {} ({} instances)",
            INFO,
            style(&job.id).bold(),
            style(instances.len()).cyan()
        );
        for instance in instances {
            let tolerance = if instance.continue_on_error {
                style(" [continue-on-error]").yellow().to_string()
            } else {
                String::new()
            };
            println!("    {}{}", instance.display_name(), tolerance);
        }
    }
    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_store(false).await?;
    let pipelines = store.list_pipelines().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_executions(pipeline_name).await?;
            let passed = runs.iter().filter(|r| r.status.is_success()).count();
            println!(
                "  {} ({} runs: {} passed, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(passed).green(),
                style(runs.len() - passed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store(false).await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_execution_details(&summary),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_executions(&pipeline).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    runs.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_execution_summary(summary));
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_reported(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Instances: {} ({} succeeded, {} tolerated, {} failed, {} cancelled)",
        summary.total_instances,
        style(summary.succeeded).green(),
        style(summary.tolerated).yellow(),
        style(summary.failed).red(),
        summary.cancelled
    );
    if summary.skipped_jobs > 0 {
        println!("  Skipped jobs: {}", style(summary.skipped_jobs).dim());
    }
}
