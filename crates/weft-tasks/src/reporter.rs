//! Scheduler lifecycle reporting

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::collision::{CollisionType, Recommendation, Severity};
use crate::execution::ResourceAllocation;
use crate::task::{Priority, TaskId, TaskType};

/// Events emitted by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A task was accepted and registered
    TaskAdded {
        id: TaskId,
        task_type: TaskType,
        priority: Priority,
    },
    /// An execution moved to running
    TaskStarted {
        id: TaskId,
        attempt: u32,
        agent_id: Option<String>,
    },
    /// A handler reported progress
    TaskProgress { id: TaskId, attempt: u32, progress: u8 },
    /// An execution finished successfully
    TaskCompleted {
        id: TaskId,
        attempt: u32,
        duration: Duration,
    },
    /// An execution failed
    TaskFailed {
        id: TaskId,
        attempt: u32,
        duration: Duration,
        error: String,
    },
    /// An execution was cancelled
    TaskCancelled { id: TaskId, attempt: u32 },
    /// A running execution was paused
    TaskPaused { id: TaskId },
    /// A paused execution was resumed
    TaskResumed { id: TaskId },
    /// A submitted task collides with in-flight work
    CollisionDetected {
        id: TaskId,
        collision_type: CollisionType,
        severity: Severity,
        conflicting: Vec<TaskId>,
    },
    /// A collision strategy was applied
    CollisionResolved {
        id: TaskId,
        recommendation: Recommendation,
        outcome: String,
    },
    /// Resources were committed to an execution
    ResourceAllocated {
        id: TaskId,
        allocations: Vec<ResourceAllocation>,
    },
    /// Resources held by an execution were returned to the pool
    ResourceReleased {
        id: TaskId,
        allocations: Vec<ResourceAllocation>,
    },
    /// Periodic view of pool utilization and agent workload
    ResourceSnapshot {
        utilization: BTreeMap<String, f64>,
        workload: BTreeMap<String, usize>,
    },
    /// A planned batch is starting
    BatchStarted { batch: usize, task_count: usize },
    /// Every batch of a bulk execution has settled
    PlanCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        duration: Duration,
    },
}

impl SchedulerEvent {
    /// Task the event is about, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::TaskAdded { id, .. }
            | Self::TaskStarted { id, .. }
            | Self::TaskProgress { id, .. }
            | Self::TaskCompleted { id, .. }
            | Self::TaskFailed { id, .. }
            | Self::TaskCancelled { id, .. }
            | Self::TaskPaused { id }
            | Self::TaskResumed { id }
            | Self::CollisionDetected { id, .. }
            | Self::CollisionResolved { id, .. }
            | Self::ResourceAllocated { id, .. }
            | Self::ResourceReleased { id, .. } => Some(id),
            Self::ResourceSnapshot { .. } | Self::BatchStarted { .. } | Self::PlanCompleted { .. } => None,
        }
    }

    /// Short snake_case name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskAdded { .. } => "task_added",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskProgress { .. } => "task_progress",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::TaskPaused { .. } => "task_paused",
            Self::TaskResumed { .. } => "task_resumed",
            Self::CollisionDetected { .. } => "collision_detected",
            Self::CollisionResolved { .. } => "collision_resolved",
            Self::ResourceAllocated { .. } => "resource_allocated",
            Self::ResourceReleased { .. } => "resource_released",
            Self::ResourceSnapshot { .. } => "resource_snapshot",
            Self::BatchStarted { .. } => "batch_started",
            Self::PlanCompleted { .. } => "plan_completed",
        }
    }
}

/// Sink for scheduler events
pub trait TaskReporter: Send + Sync {
    /// Handle an event. Must not block.
    fn report(&self, event: &SchedulerEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::TaskAdded { id, task_type, priority } => {
                tracing::debug!(task_id = %id, %task_type, %priority, "task added");
            }
            SchedulerEvent::TaskStarted { id, attempt, agent_id } => {
                tracing::info!(task_id = %id, attempt, agent = agent_id.as_deref().unwrap_or("-"), "task started");
            }
            SchedulerEvent::TaskProgress { id, progress, .. } => {
                tracing::trace!(task_id = %id, progress, "task progress");
            }
            SchedulerEvent::TaskCompleted { id, attempt, duration } => {
                tracing::info!("{} completed in {:.1}s (attempt {})", id, duration.as_secs_f64(), attempt);
            }
            SchedulerEvent::TaskFailed { id, attempt, duration, error } => {
                tracing::error!(
                    "{} failed after {:.1}s (attempt {}): {}",
                    id,
                    duration.as_secs_f64(),
                    attempt,
                    error
                );
            }
            SchedulerEvent::TaskCancelled { id, attempt } => {
                tracing::warn!(task_id = %id, attempt, "task cancelled");
            }
            SchedulerEvent::TaskPaused { id } => tracing::info!(task_id = %id, "task paused"),
            SchedulerEvent::TaskResumed { id } => tracing::info!(task_id = %id, "task resumed"),
            SchedulerEvent::CollisionDetected {
                id,
                collision_type,
                severity,
                conflicting,
            } => {
                tracing::warn!(
                    task_id = %id,
                    %collision_type,
                    %severity,
                    conflicting = conflicting.len(),
                    "collision detected"
                );
            }
            SchedulerEvent::CollisionResolved { id, recommendation, outcome } => {
                tracing::info!(task_id = %id, %recommendation, %outcome, "collision resolved");
            }
            SchedulerEvent::ResourceAllocated { id, allocations } => {
                tracing::debug!(task_id = %id, count = allocations.len(), "resources allocated");
            }
            SchedulerEvent::ResourceReleased { id, allocations } => {
                tracing::debug!(task_id = %id, count = allocations.len(), "resources released");
            }
            SchedulerEvent::ResourceSnapshot { utilization, workload } => {
                tracing::debug!(?utilization, ?workload, "resource snapshot");
            }
            SchedulerEvent::BatchStarted { batch, task_count } => {
                tracing::info!("Starting batch {} ({} tasks)", batch, task_count);
            }
            SchedulerEvent::PlanCompleted {
                total,
                succeeded,
                failed,
                cancelled,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} failed, {} cancelled ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cancelled,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Collected events about one task
    pub fn events_for(&self, id: &TaskId) -> Vec<SchedulerEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.task_id() == Some(id))
            .collect()
    }

    /// Kinds of collected events, in order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(SchedulerEvent::kind).collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &SchedulerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Forwards events into a bounded channel; events are dropped when it is full
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TaskReporter for ChannelReporter {
    fn report(&self, event: &SchedulerEvent) {
        match self.tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                tracing::warn!(event = dropped.kind(), "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Registry of task reporters
#[derive(Clone)]
pub struct ReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl ReporterRegistry {
    /// Registry with a [`TracingReporter`]
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter the caller keeps a handle to
    pub fn register_arc(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &SchedulerEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
