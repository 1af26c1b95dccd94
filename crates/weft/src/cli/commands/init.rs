//! Init command

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use weft_core::config::defaults::{default_config_toml, DEFAULT_CONFIG_TEMPLATE, DEFAULT_CONFIG_TOML};
use weft_core::config::validation::validate_config;
use weft_core::Config;

use crate::cli::output;
use crate::cli::{Cli, OutputFormat};

/// Write a starter configuration file
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    pub force: bool,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write every setting with its default value instead of the commented template
    #[arg(long)]
    pub expanded: bool,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(force = self.force, expanded = self.expanded, "executing init command");
        let cwd = std::env::current_dir()?;
        let config_path = self
            .output
            .clone()
            .unwrap_or_else(|| cwd.join(DEFAULT_CONFIG_TOML));

        if config_path.exists() && !self.force {
            anyhow::bail!(
                "Configuration file already exists at {}. Use --force to overwrite.",
                config_path.display()
            );
        }

        let content = if self.expanded {
            default_config_toml()
        } else {
            DEFAULT_CONFIG_TEMPLATE.to_string()
        };
        let config: Config = toml::from_str(&content)?;
        validate_config(&config)?;
        std::fs::write(&config_path, &content)?;

        match cli.format {
            OutputFormat::Json => {
                let out = serde_json::json!({
                    "created": config_path.to_string_lossy(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            OutputFormat::Text if !cli.quiet => {
                output::success(&format!(
                    "Created {}",
                    output::path_style().apply_to(config_path.display())
                ));
                output::info("Edit resources and agents, then run `weft validate`");
            }
            OutputFormat::Text => {}
        }

        Ok(())
    }
}
