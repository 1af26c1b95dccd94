//! Error types for the scheduling engine

use std::time::Duration;

use thiserror::Error;

use crate::collision::{CollisionType, Severity};
use crate::task::TaskId;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors returned by the scheduler, planner and resolver
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The submitted task is malformed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The task collides in a way no strategy can resolve
    #[error("Critical {collision_type} collision for task '{task}' (conflicting: {})", format_ids(.conflicting))]
    CriticalCollision {
        task: TaskId,
        collision_type: CollisionType,
        severity: Severity,
        conflicting: Vec<TaskId>,
    },

    /// A referenced task is not registered
    #[error("Task '{0}' is not registered")]
    UnknownTask(TaskId),

    /// A referenced resource is not in the pool
    #[error("Resource '{0}' is not registered in the pool")]
    UnknownResource(String),

    /// An exclusive claim clashes with a resource another task holds
    #[error("Resource '{resource}' is held by task '{holder}'")]
    ResourceBusy { resource: String, holder: TaskId },

    /// A resource with this name is already registered
    #[error("Resource '{0}' is already registered")]
    DuplicateResource(String),

    /// Waiting for conflicting tasks took too long
    #[error("Task '{task}' timed out after {timeout:?} waiting for: {}", format_ids(.waiting_on))]
    SerializeTimeout {
        task: TaskId,
        timeout: Duration,
        waiting_on: Vec<TaskId>,
    },

    /// Failed to read or parse a task manifest
    #[error("Invalid task manifest: {0}")]
    Manifest(String),

    /// Error from the core crate (configuration, IO)
    #[error(transparent)]
    Core(#[from] weft_core::WeftError),
}

/// Problems with a task's own fields
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Task id is blank
    #[error("Task id cannot be empty")]
    EmptyId,

    /// Task name is blank
    #[error("Task '{0}' has an empty name")]
    EmptyName(TaskId),

    /// Estimated duration must be positive
    #[error("Task '{0}' must have a positive estimated duration")]
    NonPositiveDuration(TaskId),

    /// Task declares no resources
    #[error("Task '{0}' must declare at least one required resource")]
    NoResources(TaskId),

    /// A resource request asks for zero units
    #[error("Task '{task}' requests zero units of '{resource}'")]
    ZeroCapacityRequest { task: TaskId, resource: String },

    /// A resource request names a resource the pool does not know
    #[error("Task '{task}' requests unknown resource '{resource}'")]
    UnknownResource { task: TaskId, resource: String },

    /// A task with this id is already registered
    #[error("Task '{0}' is already registered")]
    DuplicateTask(TaskId),
}

/// Error returned by a task handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure
    #[error("{0}")]
    Failed(String),

    /// The handler stopped because the execution was cancelled
    #[error("Execution cancelled")]
    Cancelled,

    /// Any other error raised inside a handler
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    /// Create a failure with a message
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        Self::Failed(msg.into())
    }
}

fn format_ids(ids: &[TaskId]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
