//! Configuration validation

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_scheduler(config)?;
    validate_agents(config)?;
    validate_splitting(config)?;
    validate_monitoring(config)?;
    validate_resources(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_scheduler(config: &Config) -> Result<()> {
    if config.scheduler.max_parallel_tasks == 0 {
        return Err(ConfigError::invalid(
            "scheduler.max_parallel_tasks",
            "must be at least 1",
        )
        .into());
    }
    Ok(())
}

fn validate_agents(config: &Config) -> Result<()> {
    if config.agents.max_concurrent_tasks == 0 {
        return Err(
            ConfigError::invalid("agents.max_concurrent_tasks", "must be at least 1").into(),
        );
    }

    if config.agents.pool.is_empty() {
        return Err(ConfigError::invalid("agents.pool", "agent pool cannot be empty").into());
    }

    if let Some(i) = config.agents.pool.iter().position(|a| a.trim().is_empty()) {
        return Err(ConfigError::invalid(
            format!("agents.pool[{}]", i),
            "agent id cannot be empty",
        )
        .into());
    }

    Ok(())
}

fn validate_splitting(config: &Config) -> Result<()> {
    if !(1..=4).contains(&config.splitting.max_subtasks) {
        return Err(
            ConfigError::invalid("splitting.max_subtasks", "must be between 1 and 4").into(),
        );
    }
    Ok(())
}

fn validate_monitoring(config: &Config) -> Result<()> {
    if config.monitoring.snapshot_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "monitoring.snapshot_interval_ms",
            "must be positive",
        )
        .into());
    }
    Ok(())
}

fn validate_resources(config: &Config) -> Result<()> {
    if !config.resources.is_empty() {
        debug!(count = config.resources.len(), "validating resources");
    }

    let mut seen = HashSet::new();
    for (i, resource) in config.resources.iter().enumerate() {
        if resource.name.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("resources[{}].name", i),
                "resource name cannot be empty",
            )
            .into());
        }

        if resource.capacity == 0 {
            return Err(ConfigError::invalid(
                format!("resources[{}].capacity", i),
                "capacity must be positive",
            )
            .into());
        }

        if !seen.insert(resource.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("resources[{}].name", i),
                format!("duplicate resource '{}'", resource.name),
            )
            .into());
        }
    }

    Ok(())
}
