//! Plan command

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use weft_core::config::load_config_or_default;
use weft_tasks::planner::create_execution_plan;
use weft_tasks::{ResourcePool, TaskManifest};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Show how a manifest would be split into resource-safe batches
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Task manifest (TOML or YAML)
    pub manifest: PathBuf,
}

impl PlanCommand {
    /// Execute the plan command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(manifest = %self.manifest.display(), "executing plan command");
        let cwd = std::env::current_dir()?;
        let (config, _) = load_config_or_default(&cwd);

        let manifest = TaskManifest::load(&self.manifest)
            .with_context(|| format!("failed to load manifest {}", self.manifest.display()))?;
        let pool = ResourcePool::with_resources(config.resources.clone())?;

        let ids = manifest.ids();
        let tasks: HashMap<_, _> = manifest
            .tasks
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let plan = create_execution_plan(&ids, &tasks, &pool)?;

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!(
                        "{}",
                        output::header(&format!(
                            "{} task{} in {} batch{}",
                            plan.task_count(),
                            if plan.task_count() == 1 { "" } else { "s" },
                            plan.batches.len(),
                            if plan.batches.len() == 1 { "" } else { "es" },
                        ))
                    );
                    println!();
                }
                print!("{}", plan.describe(&tasks));
                if cli.verbose && !plan.resource_utilization.is_empty() {
                    println!();
                    println!("{}", output::header("Peak units per batch"));
                    for (resource, units) in &plan.resource_utilization {
                        println!("{}", output::key_value(resource, &units.to_string()));
                    }
                }
            }
        }

        Ok(())
    }
}
