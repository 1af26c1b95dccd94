//! Runtime execution records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Lifecycle state of a task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the execution holds its resources
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Completed)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Units of one resource committed to an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// Pool resource name
    pub resource: String,
    /// Units committed
    pub units: u32,
    /// Whether the allocation was exclusive
    pub exclusive: bool,
}

/// Record of one attempted run of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Task being executed
    pub task_id: TaskId,
    /// 1 for the first run, incremented on every retry
    pub attempt: u32,
    /// When the execution was created
    pub start_time: DateTime<Utc>,
    /// When the execution reached a terminal state
    pub end_time: Option<DateTime<Utc>>,
    /// Current lifecycle state
    pub status: ExecutionStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Handler output on success
    pub result: Option<serde_json::Value>,
    /// Captured failure
    pub error: Option<String>,
    /// Resources committed while running
    pub resource_usage: Vec<ResourceAllocation>,
}

impl TaskExecution {
    /// Create a queued execution
    pub fn queued(task_id: TaskId, attempt: u32) -> Self {
        Self {
            task_id,
            attempt,
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            resource_usage: Vec::new(),
        }
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Terminal transitions stamp `end_time`. Returns whether the state changed.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        true
    }

    /// Wall-clock time spent so far, or in total once terminal
    pub fn elapsed(&self) -> std::time::Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        use ExecutionStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(Paused.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Paused));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn test_transition_stamps_end_time() {
        let mut exec = TaskExecution::queued(TaskId::new("a"), 1);
        assert!(exec.transition(ExecutionStatus::Running));
        assert!(exec.end_time.is_none());
        assert!(exec.transition(ExecutionStatus::Completed));
        assert!(exec.end_time.is_some());
        assert!(!exec.transition(ExecutionStatus::Running));
        assert_eq!(exec.status, ExecutionStatus::Completed);
    }
}
