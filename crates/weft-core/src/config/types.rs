//! Configuration types

use serde::{Deserialize, Serialize};

use crate::types::Resource;

use super::defaults::{default_agent_pool, default_resources};

/// Main configuration for Weft
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Dispatch configuration
    pub scheduler: SchedulerConfig,

    /// Agent pool configuration
    pub agents: AgentsConfig,

    /// Collision resolution configuration
    pub collision: CollisionConfig,

    /// Task splitting configuration
    pub splitting: SplittingConfig,

    /// Resource monitoring configuration
    pub monitoring: MonitoringConfig,

    /// Resources seeded into the pool at startup
    pub resources: Vec<Resource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: None,
            scheduler: SchedulerConfig::default(),
            agents: AgentsConfig::default(),
            collision: CollisionConfig::default(),
            splitting: SplittingConfig::default(),
            monitoring: MonitoringConfig::default(),
            resources: default_resources(),
        }
    }
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum concurrently executing tasks
    pub max_parallel_tasks: usize,

    /// Whether `add_task` dispatches immediately when a slot is free
    pub auto_dispatch: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 10,
            auto_dispatch: true,
        }
    }
}

/// Agent pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Candidate agents for reassignment
    pub pool: Vec<String>,

    /// Running tasks an agent may own before new work collides
    pub max_concurrent_tasks: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            pool: default_agent_pool(),
            max_concurrent_tasks: 3,
        }
    }
}

/// Collision resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Base delay for rescheduled tasks, in milliseconds
    pub base_delay_ms: u64,

    /// How long a serialized task waits for its conflicts, in seconds
    pub serialize_timeout_secs: u64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            serialize_timeout_secs: 300,
        }
    }
}

/// Task splitting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplittingConfig {
    /// Upper bound on subtasks per split
    pub max_subtasks: usize,
}

impl Default for SplittingConfig {
    fn default() -> Self {
        Self { max_subtasks: 4 }
    }
}

/// Resource monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Interval between resource snapshots, in milliseconds
    pub snapshot_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_ms: 5000,
        }
    }
}
