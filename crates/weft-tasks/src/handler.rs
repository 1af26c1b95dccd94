//! Task handlers and the context they run in

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use tracing::debug;

use crate::error::HandlerError;
use crate::task::{Task, TaskId, TaskType};

/// Executes tasks of one [`TaskType`]
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Type of task this handler runs
    fn task_type(&self) -> TaskType;

    /// Run the task to completion
    async fn execute(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Receives progress reports from running handlers
pub(crate) trait ProgressSink: Send + Sync {
    fn report_progress(&self, task_id: &TaskId, attempt: u32, progress: u8);
}

struct DiscardProgress;

impl ProgressSink for DiscardProgress {
    fn report_progress(&self, _task_id: &TaskId, _attempt: u32, _progress: u8) {}
}

/// Handle given to a handler for one execution attempt
pub struct ExecutionContext {
    task_id: TaskId,
    attempt: u32,
    cancelled: watch::Receiver<bool>,
    sink: Arc<dyn ProgressSink>,
}

impl ExecutionContext {
    pub(crate) fn new(
        task_id: TaskId,
        attempt: u32,
        cancelled: watch::Receiver<bool>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            task_id,
            attempt,
            cancelled,
            sink,
        }
    }

    /// Context not attached to a scheduler: progress is discarded and the
    /// execution is never cancelled
    pub fn detached(task_id: impl Into<TaskId>) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(task_id.into(), 1, rx, Arc::new(DiscardProgress))
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report completion percentage; values above 100 are clamped
    pub fn report_progress(&self, progress: u8) {
        self.sink
            .report_progress(&self.task_id, self.attempt, progress.min(100));
    }

    /// Whether the execution was cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the execution is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Simulates work by sleeping for the task's estimated duration
#[derive(Debug, Clone)]
pub struct PlaceholderHandler {
    task_type: TaskType,
    time_scale: f64,
}

impl PlaceholderHandler {
    const STEPS: u32 = 4;

    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            time_scale: 1.0,
        }
    }

    /// Scale simulated durations (0.0 finishes immediately)
    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = time_scale.max(0.0);
        self
    }

    fn outcome(&self) -> &'static str {
        match self.task_type {
            TaskType::Development => "code changes produced",
            TaskType::Testing => "test suite passed",
            TaskType::Build => "artifacts built",
            TaskType::Deployment => "release deployed",
            TaskType::QualityAssurance => "quality gates passed",
            TaskType::Documentation => "documentation updated",
            TaskType::Analysis => "analysis report written",
            TaskType::Monitoring => "monitoring checks green",
            TaskType::Security => "no findings",
        }
    }
}

#[async_trait]
impl TaskHandler for PlaceholderHandler {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    async fn execute(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, HandlerError> {
        let total = task.estimated_duration.mul_f64(self.time_scale);
        let step = total / Self::STEPS;
        debug!(task_id = %task.id, simulated_ms = total.as_millis() as u64, "running placeholder");

        for i in 1..=Self::STEPS {
            if step > Duration::ZERO {
                tokio::select! {
                    _ = tokio::time::sleep(step) => {}
                    _ = ctx.cancelled() => return Err(HandlerError::Cancelled),
                }
            } else if ctx.is_cancelled() {
                return Err(HandlerError::Cancelled);
            }
            ctx.report_progress((i * 100 / Self::STEPS) as u8);
        }

        Ok(json!({
            "task_id": task.id,
            "task_type": task.task_type,
            "outcome": self.outcome(),
            "simulated_ms": total.as_millis() as u64,
        }))
    }
}

/// Handlers keyed by task type
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a placeholder handler for every task type
    pub fn with_placeholders(time_scale: f64) -> Self {
        let mut registry = Self::new();
        for task_type in TaskType::ALL {
            registry.register(PlaceholderHandler::new(task_type).with_time_scale(time_scale));
        }
        registry
    }

    /// Register a handler, replacing any previous one for its type
    pub fn register<H: TaskHandler + 'static>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type();
        debug!(%task_type, "registering task handler");
        self.handlers.insert(task_type, handler);
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("task_types", &types)
            .finish()
    }
}
