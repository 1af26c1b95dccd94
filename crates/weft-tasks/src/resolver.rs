//! Collision resolution strategies

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use weft_core::Config;

use crate::collision::{CollisionDetectionResult, Recommendation};
use crate::error::{Result, SchedulerError};
use crate::resources::ResourcePool;
use crate::task::{Task, TaskId};
use crate::workload::AgentWorkload;

/// Hook for shrinking or redistributing a task's resource requests when it
/// collides on a non-exclusive resource
pub trait ResourceAllocationStrategy: Send + Sync {
    fn rebalance(&self, task: &mut Task, collision: &CollisionDetectionResult, pool: &ResourcePool);
}

/// Leaves resource requests untouched
#[derive(Debug, Default)]
pub struct KeepRequestedResources;

impl ResourceAllocationStrategy for KeepRequestedResources {
    fn rebalance(&self, task: &mut Task, _collision: &CollisionDetectionResult, _pool: &ResourcePool) {
        debug!(task_id = %task.id, "keeping requested resources");
    }
}

/// What the scheduler must do after a collision was handled
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Register and dispatch as usual
    Proceed,
    /// Suspend the submitter until these tasks are terminal
    WaitFor(Vec<TaskId>),
    /// Dispatch no earlier than this delay (already stored in the task metadata)
    Delayed(Duration),
    /// The task's agent was rewritten
    Reassigned { from: Option<String>, to: String },
    /// Submit these subtasks instead of the original task
    Split(Vec<Task>),
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => f.write_str("proceeded"),
            Self::WaitFor(ids) => write!(f, "serialized behind {} task(s)", ids.len()),
            Self::Delayed(delay) => write!(f, "rescheduled by {}ms", delay.as_millis()),
            Self::Reassigned { from, to } => {
                write!(f, "reassigned from {} to {}", from.as_deref().unwrap_or("-"), to)
            }
            Self::Split(subtasks) => write!(f, "split into {} subtasks", subtasks.len()),
        }
    }
}

/// Tunables for the resolver
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Base delay for rescheduled tasks
    pub base_delay: Duration,
    /// Upper bound on subtasks per split
    pub max_subtasks: usize,
    /// Candidate agents for reassignment
    pub agent_pool: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ResolverSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_delay: Duration::from_millis(config.collision.base_delay_ms),
            max_subtasks: config.splitting.max_subtasks,
            agent_pool: config.agents.pool.clone(),
        }
    }
}

/// Maps detected collisions to concrete actions
pub struct CollisionResolver {
    settings: ResolverSettings,
    allocation: Arc<dyn ResourceAllocationStrategy>,
}

impl CollisionResolver {
    pub fn new(settings: ResolverSettings) -> Self {
        Self {
            settings,
            allocation: Arc::new(KeepRequestedResources),
        }
    }

    /// Replace the resource allocation hook
    pub fn with_allocation_strategy(mut self, strategy: Arc<dyn ResourceAllocationStrategy>) -> Self {
        self.allocation = strategy;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Apply the recommended strategy to `task`.
    ///
    /// Critical collisions are never resolved; they come back as
    /// [`SchedulerError::CriticalCollision`].
    pub fn handle_collision(
        &self,
        task: &mut Task,
        result: &CollisionDetectionResult,
        pool: &ResourcePool,
        workload: &AgentWorkload,
    ) -> Result<Resolution> {
        if !result.has_collision {
            return Ok(Resolution::Proceed);
        }

        if result.is_critical() {
            warn!(task_id = %task.id, collision_type = ?result.collision_type, "rejecting task with critical collision");
            return Err(SchedulerError::CriticalCollision {
                task: task.id.clone(),
                collision_type: result
                    .collision_type
                    .unwrap_or(crate::collision::CollisionType::DependencyCycle),
                severity: result.severity,
                conflicting: result.conflicting_tasks.clone(),
            });
        }

        let Some(recommendation) = result.recommendation else {
            return Ok(Resolution::Proceed);
        };

        let resolution = match recommendation {
            Recommendation::Serialize => Resolution::WaitFor(result.conflicting_tasks.clone()),
            Recommendation::Reschedule => {
                let delay = self.reschedule_delay(result);
                task.metadata.scheduled_delay = Some(delay);
                Resolution::Delayed(delay)
            }
            Recommendation::ResourceAllocation => {
                self.allocation.rebalance(task, result, pool);
                Resolution::Proceed
            }
            Recommendation::TaskSplitting => {
                let subtasks = self.split_task(task);
                if subtasks.is_empty() {
                    Resolution::Proceed
                } else {
                    Resolution::Split(subtasks)
                }
            }
            Recommendation::PriorityAdjustment => {
                debug!(task_id = %task.id, priority = %task.priority, "priority adjustment is advisory");
                Resolution::Proceed
            }
            Recommendation::AgentReassignment => self.reassign_agent(task, workload),
        };

        info!(task_id = %task.id, %recommendation, ?resolution, "collision handled");
        Ok(resolution)
    }

    /// `base_delay × severity × number of conflicting tasks`
    pub fn reschedule_delay(&self, result: &CollisionDetectionResult) -> Duration {
        let factor = result.severity.value() * result.conflicting_tasks.len().max(1) as u32;
        self.settings.base_delay * factor
    }

    /// Split a task into a chain of at most `max_subtasks` pieces.
    ///
    /// Returns an empty list when the task type is atomic.
    pub fn split_task(&self, task: &Task) -> Vec<Task> {
        let pieces = task
            .task_type
            .split_factor()
            .min(self.settings.max_subtasks);
        if pieces <= 1 {
            debug!(task_id = %task.id, task_type = %task.task_type, "task type cannot be split");
            return Vec::new();
        }

        let share = (task.estimated_duration / pieces as u32).max(Duration::from_millis(1));
        (0..pieces)
            .map(|i| {
                let mut sub = task.clone();
                sub.id = task.id.subtask(i);
                sub.name = format!("{} (part {}/{})", task.name, i + 1, pieces);
                sub.estimated_duration = share;
                sub.dependencies = if i == 0 {
                    task.dependencies
                        .iter()
                        .filter(|d| **d != task.id)
                        .cloned()
                        .collect()
                } else {
                    [task.id.subtask(i - 1)].into_iter().collect()
                };
                sub.metadata.parent_task = Some(task.id.clone());
                sub.metadata.subtask_index = Some(i);
                sub
            })
            .collect()
    }

    fn reassign_agent(&self, task: &mut Task, workload: &AgentWorkload) -> Resolution {
        let current = task.agent_id.clone();
        let current_load = current.as_deref().map_or(usize::MAX, |a| workload.load(a));

        let candidates: Vec<String> = self
            .settings
            .agent_pool
            .iter()
            .filter(|a| Some(a.as_str()) != current.as_deref())
            .cloned()
            .collect();

        match workload.least_loaded(&candidates) {
            Some(agent) if workload.load(agent) < current_load => {
                let to = agent.to_string();
                task.agent_id = Some(to.clone());
                Resolution::Reassigned { from: current, to }
            }
            _ => {
                debug!(task_id = %task.id, "no less-loaded agent available, keeping assignment");
                Resolution::Proceed
            }
        }
    }
}
