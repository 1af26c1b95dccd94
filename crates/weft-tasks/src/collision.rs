//! Collision detection between a candidate task and in-flight work
//!
//! A candidate is checked against every in-flight execution for shared
//! exclusive resources, SDLC phase ordering and agent overload, and its
//! dependency graph is walked for cycles. The most severe finding decides
//! the reported collision type and the recommended resolution.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::resources::ResourcePool;
use crate::task::{Task, TaskId};
use crate::workload::AgentWorkload;

/// Kind of conflict detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionType {
    ResourceConflict,
    DependencyCycle,
    SdlcPhaseViolation,
    AgentOverload,
    FileLockConflict,
    BuildSystemConflict,
}

impl CollisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceConflict => "resource_conflict",
            Self::DependencyCycle => "dependency_cycle",
            Self::SdlcPhaseViolation => "sdlc_phase_violation",
            Self::AgentOverload => "agent_overload",
            Self::FileLockConflict => "file_lock_conflict",
            Self::BuildSystemConflict => "build_system_conflict",
        }
    }
}

impl fmt::Display for CollisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a collision is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

impl Severity {
    /// Numeric weight (info = 1 … critical = 4)
    pub fn value(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Resolution strategy suggested for a collision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Serialize,
    Reschedule,
    ResourceAllocation,
    TaskSplitting,
    PriorityAdjustment,
    AgentReassignment,
}

impl Recommendation {
    /// Derive the strategy from the collision type and overall severity
    pub fn for_collision(collision_type: CollisionType, severity: Severity) -> Self {
        match collision_type {
            CollisionType::ResourceConflict if severity < Severity::Error => {
                Self::ResourceAllocation
            }
            CollisionType::ResourceConflict
            | CollisionType::FileLockConflict
            | CollisionType::BuildSystemConflict => Self::Serialize,
            CollisionType::AgentOverload => Self::AgentReassignment,
            CollisionType::SdlcPhaseViolation => Self::Reschedule,
            CollisionType::DependencyCycle => Self::TaskSplitting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serialize => "serialize",
            Self::Reschedule => "reschedule",
            Self::ResourceAllocation => "resource_allocation",
            Self::TaskSplitting => "task_splitting",
            Self::PriorityAdjustment => "priority_adjustment",
            Self::AgentReassignment => "agent_reassignment",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one candidate task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionDetectionResult {
    /// Whether any check fired
    pub has_collision: bool,
    /// Type of the most severe finding
    pub collision_type: Option<CollisionType>,
    /// Tasks involved in any finding, in detection order
    pub conflicting_tasks: Vec<TaskId>,
    /// Suggested resolution
    pub recommendation: Option<Recommendation>,
    /// Maximum severity across findings
    pub severity: Severity,
}

impl CollisionDetectionResult {
    /// A result with no collision
    pub fn clear() -> Self {
        Self {
            has_collision: false,
            collision_type: None,
            conflicting_tasks: Vec::new(),
            recommendation: None,
            severity: Severity::Info,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.has_collision && self.severity == Severity::Critical
    }
}

/// Scheduler state a detection runs against
pub struct DetectionContext<'a> {
    /// Every registered task
    pub tasks: &'a HashMap<TaskId, Task>,
    /// Tasks whose execution is running or paused
    pub in_flight: Vec<&'a Task>,
    /// Resource pool, for pool-level exclusivity
    pub pool: &'a ResourcePool,
    /// Running task counts per agent
    pub workload: &'a AgentWorkload,
}

#[derive(Debug)]
struct Finding {
    collision_type: CollisionType,
    severity: Severity,
    conflicting: Vec<TaskId>,
}

/// Classifies conflicts between a candidate and in-flight tasks
#[derive(Debug, Clone)]
pub struct CollisionDetector {
    max_tasks_per_agent: usize,
}

impl Default for CollisionDetector {
    fn default() -> Self {
        Self::new(3)
    }
}

impl CollisionDetector {
    pub fn new(max_tasks_per_agent: usize) -> Self {
        Self {
            max_tasks_per_agent,
        }
    }

    /// Run every check for `candidate` and fold the findings into one result
    #[instrument(skip_all, fields(task_id = %candidate.id, in_flight = ctx.in_flight.len()))]
    pub fn detect(&self, candidate: &Task, ctx: &DetectionContext<'_>) -> CollisionDetectionResult {
        let mut findings = Vec::new();

        if let Some(f) = self.check_resources(candidate, ctx) {
            findings.push(f);
        }
        if let Some(f) = self.check_sdlc_phase(candidate, ctx) {
            findings.push(f);
        }
        if let Some(f) = self.check_agent_overload(candidate, ctx) {
            findings.push(f);
        }
        if let Some(cycle) = find_dependency_cycle(candidate, ctx.tasks) {
            findings.push(Finding {
                collision_type: CollisionType::DependencyCycle,
                severity: Severity::Critical,
                conflicting: cycle,
            });
        }

        let result = fold_findings(findings);
        if result.has_collision {
            debug!(
                collision_type = ?result.collision_type,
                severity = %result.severity,
                conflicting = result.conflicting_tasks.len(),
                "collision detected"
            );
        }
        result
    }

    fn check_resources(&self, candidate: &Task, ctx: &DetectionContext<'_>) -> Option<Finding> {
        let mut conflicting = Vec::new();
        let mut severity = Severity::Info;

        for running in &ctx.in_flight {
            if running.id == candidate.id {
                continue;
            }
            for request in &candidate.required_resources {
                let Some(held) = running.requests(&request.name) else {
                    continue;
                };
                let pool_exclusive = ctx.pool.is_exclusive(&request.name);
                if !(pool_exclusive || request.exclusive || held.exclusive) {
                    continue;
                }
                let level = if pool_exclusive {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                severity = severity.max(level);
                if !conflicting.contains(&running.id) {
                    conflicting.push(running.id.clone());
                }
            }
        }

        (!conflicting.is_empty()).then_some(Finding {
            collision_type: CollisionType::ResourceConflict,
            severity,
            conflicting,
        })
    }

    fn check_sdlc_phase(&self, candidate: &Task, ctx: &DetectionContext<'_>) -> Option<Finding> {
        let conflicting: Vec<TaskId> = ctx
            .in_flight
            .iter()
            .filter(|t| t.id != candidate.id && candidate.sdlc_phase < t.sdlc_phase)
            .map(|t| t.id.clone())
            .collect();

        (!conflicting.is_empty()).then_some(Finding {
            collision_type: CollisionType::SdlcPhaseViolation,
            severity: Severity::Error,
            conflicting,
        })
    }

    fn check_agent_overload(&self, candidate: &Task, ctx: &DetectionContext<'_>) -> Option<Finding> {
        let agent = candidate.agent_id.as_deref()?;
        if ctx.workload.load(agent) < self.max_tasks_per_agent {
            return None;
        }

        let conflicting: Vec<TaskId> = ctx
            .in_flight
            .iter()
            .filter(|t| t.id != candidate.id && t.agent_id.as_deref() == Some(agent))
            .map(|t| t.id.clone())
            .collect();

        (!conflicting.is_empty()).then_some(Finding {
            collision_type: CollisionType::AgentOverload,
            severity: Severity::Warning,
            conflicting,
        })
    }
}

/// Depth-first walk of `dependencies` starting at `candidate`.
///
/// Returns the path back to the candidate (excluding the candidate itself)
/// if the candidate can reach itself. Dependencies on unregistered tasks are
/// leaves.
pub fn find_dependency_cycle(candidate: &Task, tasks: &HashMap<TaskId, Task>) -> Option<Vec<TaskId>> {
    let deps_of = |id: &TaskId| {
        if *id == candidate.id {
            Some(&candidate.dependencies)
        } else {
            tasks.get(id).map(|t| &t.dependencies)
        }
    };

    let mut visited: HashSet<&TaskId> = HashSet::new();
    // (node, path to node)
    let mut stack: Vec<(&TaskId, Vec<TaskId>)> = vec![(&candidate.id, Vec::new())];

    while let Some((node, path)) = stack.pop() {
        let Some(deps) = deps_of(node) else {
            continue;
        };
        for dep in deps {
            if *dep == candidate.id {
                return Some(path);
            }
            if visited.insert(dep) {
                let mut next = path.clone();
                next.push(dep.clone());
                stack.push((dep, next));
            }
        }
    }
    None
}

fn fold_findings(findings: Vec<Finding>) -> CollisionDetectionResult {
    let mut result = CollisionDetectionResult::clear();
    let mut worst: Option<(CollisionType, Severity)> = None;

    for finding in findings {
        result.has_collision = true;
        if worst.map_or(true, |(_, s)| finding.severity > s) {
            worst = Some((finding.collision_type, finding.severity));
        }
        for id in finding.conflicting {
            if !result.conflicting_tasks.contains(&id) {
                result.conflicting_tasks.push(id);
            }
        }
    }

    if let Some((collision_type, severity)) = worst {
        result.collision_type = Some(collision_type);
        result.severity = severity;
        result.recommendation = Some(Recommendation::for_collision(collision_type, severity));
    }
    result
}
