//! Validate command

use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use weft_core::config::load_config_from_dir;
use weft_tasks::{ResourcePool, TaskManifest};

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Validate configuration and, optionally, a task manifest
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Task manifest to check against the configured resources
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Strict mode - treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            manifest = ?self.manifest,
            strict = self.strict,
            "executing validate command"
        );
        let cwd = std::env::current_dir()?;

        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut exit_code = exit_codes::SUCCESS;

        let (config, config_path) = match load_config_from_dir(&cwd) {
            Ok((c, p)) => (Some(c), Some(p)),
            Err(e) => {
                errors.push(format!("Configuration: {}", e));
                exit_code = exit_codes::CONFIG_ERROR;
                (None, None)
            }
        };

        if let Some(ref cfg) = config {
            if cfg.agents.pool.is_empty() {
                warnings.push("Agent pool is empty; overloaded agents cannot be reassigned".to_string());
            }
            if cfg.resources.is_empty() {
                warnings.push("No resources declared; every task will be rejected".to_string());
            }
        }

        let mut task_count = None;
        if let Some(ref path) = self.manifest {
            let pool = config
                .as_ref()
                .map(|c| ResourcePool::with_resources(c.resources.clone()))
                .transpose();

            match (TaskManifest::load(path), pool) {
                (Ok(manifest), Ok(pool)) => {
                    task_count = Some(manifest.len());
                    if manifest.is_empty() {
                        warnings.push(format!("Manifest {} declares no tasks", path.display()));
                    }
                    if let Some(pool) = pool {
                        for task in &manifest.tasks {
                            for request in &task.required_resources {
                                if !pool.contains(&request.name) {
                                    errors.push(format!(
                                        "Task '{}' requests unknown resource '{}'",
                                        task.id, request.name
                                    ));
                                }
                            }
                        }
                    }
                    let ids = manifest.ids();
                    for task in &manifest.tasks {
                        for dep in &task.dependencies {
                            if !ids.contains(dep) {
                                warnings.push(format!(
                                    "Task '{}' depends on '{}' which is not in the manifest",
                                    task.id, dep
                                ));
                            }
                        }
                    }
                }
                (Err(e), _) => errors.push(format!("Manifest: {}", e)),
                (_, Err(e)) => errors.push(format!("Resources: {}", e)),
            }
            if !errors.is_empty() && exit_code == exit_codes::SUCCESS {
                exit_code = exit_codes::VALIDATION_ERROR;
            }
        }

        if self.strict {
            errors.append(&mut warnings);
            if !errors.is_empty() && exit_code == exit_codes::SUCCESS {
                exit_code = exit_codes::VALIDATION_ERROR;
            }
        }

        let passed = errors.is_empty();

        match cli.format {
            OutputFormat::Json => {
                let out = serde_json::json!({
                    "valid": passed,
                    "config_path": config_path.map(|p| p.to_string_lossy().to_string()),
                    "manifest_tasks": task_count,
                    "errors": errors,
                    "warnings": warnings
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", output::header("Validation Results"));
                    println!();

                    if let Some(path) = config_path {
                        println!(
                            "{}",
                            output::key_value("Config", &output::path_style().apply_to(path.display()).to_string())
                        );
                    }
                    if let Some(count) = task_count {
                        println!("{}", output::key_value("Tasks", &count.to_string()));
                    }
                    println!();

                    if !errors.is_empty() {
                        println!("{}", style("Errors:").red().bold());
                        for error in &errors {
                            println!("  {} {}", style("✗").red(), error);
                        }
                        println!();
                    }

                    for warning in &warnings {
                        output::warning(warning);
                    }

                    if passed {
                        output::success("Validation passed");
                    } else {
                        output::error(&format!("Validation failed with {} error(s)", errors.len()));
                    }
                }
            }
        }

        if !passed {
            std::process::exit(exit_code);
        }

        Ok(())
    }
}
