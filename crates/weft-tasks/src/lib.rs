//! Weft Tasks - concurrent task scheduling engine
//!
//! This crate decides which tasks may run side by side, detects and resolves
//! collisions between them, plans bulk submissions into resource-safe
//! batches and drives executions through a bounded async pipeline.

pub mod collision;
pub mod error;
pub mod execution;
pub mod handler;
pub mod manifest;
pub mod planner;
pub mod reporter;
pub mod resolver;
pub mod resources;
pub mod scheduler;
pub mod task;
pub mod workload;

pub use collision::{
    CollisionDetectionResult, CollisionDetector, CollisionType, Recommendation, Severity,
};
pub use error::{HandlerError, Result, SchedulerError, ValidationError};
pub use execution::{ExecutionStatus, ResourceAllocation, TaskExecution};
pub use handler::{ExecutionContext, HandlerRegistry, PlaceholderHandler, TaskHandler};
pub use manifest::TaskManifest;
pub use planner::ExecutionPlan;
pub use reporter::{
    ChannelReporter, CollectingReporter, ReporterRegistry, SchedulerEvent, TaskReporter,
    TracingReporter,
};
pub use resolver::{
    CollisionResolver, KeepRequestedResources, Resolution, ResolverSettings,
    ResourceAllocationStrategy,
};
pub use resources::ResourcePool;
pub use scheduler::{SchedulerBuilder, SchedulerOptions, TaskScheduler};
pub use task::{CollisionRisk, Priority, SdlcPhase, Task, TaskId, TaskMetadata, TaskType};
pub use workload::AgentWorkload;
