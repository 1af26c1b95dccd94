//! Run command - execute a task manifest

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use weft_core::config::load_config_or_default;
use weft_tasks::{
    ExecutionStatus, HandlerRegistry, SchedulerEvent, SchedulerOptions,
    TaskExecution, TaskManifest, TaskReporter, TaskScheduler,
};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Execute every task in a manifest with the placeholder handlers
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Task manifest (TOML or YAML)
    pub manifest: PathBuf,

    /// Maximum concurrent tasks (overrides scheduler.max_parallel_tasks)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Multiplier applied to estimated durations by the placeholder handlers
    #[arg(long, default_value_t = 1.0)]
    pub time_scale: f64,

    /// Emit periodic resource snapshots while running
    #[arg(long)]
    pub monitor: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(manifest = %self.manifest.display(), "executing run command");
        if !(self.time_scale.is_finite() && self.time_scale >= 0.0) {
            anyhow::bail!("--time-scale must be a non-negative number");
        }

        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd);

        let manifest = match TaskManifest::load(&self.manifest) {
            Ok(manifest) => manifest,
            Err(e) => {
                output::error(&format!("{}: {}", self.manifest.display(), e));
                std::process::exit(exit_codes::VALIDATION_ERROR);
            }
        };
        if manifest.is_empty() {
            if !cli.quiet {
                output::success("No tasks to run.");
            }
            return Ok(());
        }

        let mut options = SchedulerOptions::from_config(&config);
        if let Some(concurrency) = self.concurrency {
            options.max_parallel_tasks = concurrency;
        }
        // Tasks are driven batch by batch once the whole manifest is registered
        options.auto_dispatch = false;

        let show_console = !cli.quiet && cli.format == OutputFormat::Text;
        let mut builder = TaskScheduler::builder(options)
            .handlers(HandlerRegistry::with_placeholders(self.time_scale));
        let progress = show_console.then(|| progress_bar(manifest.len() as u64));
        if let Some(ref bar) = progress {
            builder = builder.reporter(ConsoleReporter::new(bar.clone(), cli.verbose));
        }
        let scheduler = builder.build()?;

        for task in manifest.tasks {
            let id = task.id.clone();
            scheduler
                .add_task(task)
                .await
                .with_context(|| format!("task '{}' was rejected", id))?;
        }

        let monitor = self
            .monitor
            .then(|| scheduler.spawn_resource_monitor(Duration::from_millis(config.monitoring.snapshot_interval_ms)));

        let ids = scheduler.task_ids();
        let outcome = tokio::select! {
            results = scheduler.execute_parallel(&ids) => Some(results?),
            _ = tokio::signal::ctrl_c() => None,
        };

        if let Some(handle) = monitor {
            handle.abort();
        }
        if let Some(ref bar) = progress {
            bar.finish_and_clear();
        }

        let Some(results) = outcome else {
            warn!("interrupted, cancelling remaining tasks");
            for id in &ids {
                scheduler.cancel_task(id);
            }
            output::warning("Interrupted; remaining tasks cancelled");
            std::process::exit(exit_codes::CANCELLED);
        };

        let mut executions: Vec<TaskExecution> = results.into_values().collect();
        executions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.task_id.cmp(&b.task_id)));
        let failed = executions
            .iter()
            .filter(|e| e.status != ExecutionStatus::Completed)
            .count();

        match cli.format {
            OutputFormat::Json => {
                let summary = serde_json::json!({
                    "total": executions.len(),
                    "succeeded": executions.len() - failed,
                    "failed": failed,
                    "tasks": executions,
                    "resource_utilization": scheduler.get_resource_utilization(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Text if !cli.quiet => {
                println!();
                for execution in &executions {
                    print_execution(execution);
                }
                println!();
                if failed == 0 {
                    output::success(&format!("{} task(s) completed", executions.len()));
                } else {
                    output::error(&format!("{}/{} task(s) did not complete", failed, executions.len()));
                }
            }
            OutputFormat::Text => {}
        }

        if failed > 0 {
            std::process::exit(exit_codes::TASK_FAILED);
        }
        Ok(())
    }
}

fn print_execution(execution: &TaskExecution) {
    let line = format!(
        "  {} {} {}",
        output::status_marker(execution.status),
        output::task_style().apply_to(&execution.task_id),
        output::duration(execution.elapsed()),
    );
    match execution.error {
        Some(ref error) => println!("{} {}", line, style(error).red().dim()),
        None => println!("{}", line),
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Console reporter printing lifecycle lines above a progress bar
struct ConsoleReporter {
    bar: ProgressBar,
    verbose: bool,
}

impl ConsoleReporter {
    fn new(bar: ProgressBar, verbose: bool) -> Self {
        Self { bar, verbose }
    }

    fn line(&self, marker: console::StyledObject<&str>, id: &str, detail: String) {
        self.bar.println(format!("  {} {} {}", marker, style(id).bold(), detail));
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::TaskStarted { id, attempt, agent_id } => {
                let mut detail = String::new();
                if let Some(agent) = agent_id {
                    detail.push_str(&style(format!("@{agent}")).dim().to_string());
                }
                if *attempt > 1 {
                    detail.push_str(&style(format!(" (attempt {attempt})")).yellow().to_string());
                }
                self.line(style("▸").dim(), id.as_str(), detail);
                self.bar.set_message(id.to_string());
            }
            SchedulerEvent::TaskProgress { id, progress, .. } if self.verbose => {
                self.bar.set_message(format!("{id} {progress}%"));
            }
            SchedulerEvent::TaskCompleted { id, duration, .. } => {
                self.line(style("✓").green(), id.as_str(), output::duration(*duration));
                self.bar.inc(1);
            }
            SchedulerEvent::TaskFailed { id, duration, error, .. } => {
                self.line(
                    style("✗").red(),
                    id.as_str(),
                    format!("{} {}", output::duration(*duration), style(error).red().dim()),
                );
                self.bar.inc(1);
            }
            SchedulerEvent::TaskCancelled { id, .. } => {
                self.line(style("○").yellow(), id.as_str(), style("cancelled").dim().to_string());
                self.bar.inc(1);
            }
            SchedulerEvent::CollisionDetected {
                id,
                collision_type,
                severity,
                conflicting,
            } => {
                let with: Vec<&str> = conflicting.iter().map(|t| t.as_str()).collect();
                self.line(
                    style("!").yellow(),
                    id.as_str(),
                    style(format!("{collision_type} collision ({severity}) with {}", with.join(", ")))
                        .yellow()
                        .to_string(),
                );
            }
            SchedulerEvent::CollisionResolved { id, outcome, .. } if self.verbose => {
                self.line(style("→").blue(), id.as_str(), style(outcome).dim().to_string());
            }
            SchedulerEvent::BatchStarted { batch, task_count } if self.verbose => {
                self.bar
                    .println(format!("  {} Batch {} ({} tasks)", style("─").dim(), batch, task_count));
            }
            SchedulerEvent::ResourceSnapshot { utilization, .. } if self.verbose => {
                if let Some(line) = snapshot_line(utilization) {
                    self.bar
                        .println(format!("  {} {}", style("◆").dim(), style(line).dim()));
                }
            }
            SchedulerEvent::PlanCompleted {
                total,
                succeeded,
                failed,
                cancelled,
                duration,
            } => {
                self.bar.println(format!(
                    "\n  {} {}/{} succeeded, {} failed, {} cancelled ({:.1}s)",
                    if *failed == 0 && *cancelled == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    cancelled,
                    duration.as_secs_f64()
                ));
            }
            _ => {}
        }
    }
}

/// Busy resources as `name=NN%`; utilization values are already percentages
fn snapshot_line(utilization: &BTreeMap<String, f64>) -> Option<String> {
    let busy: Vec<String> = utilization
        .iter()
        .filter(|(_, used)| **used > 0.0)
        .map(|(name, used)| format!("{name}={used:.0}%"))
        .collect();
    (!busy.is_empty()).then(|| busy.join(" "))
}
