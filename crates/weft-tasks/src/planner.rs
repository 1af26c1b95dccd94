//! Batch planning for bulk execution

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::resources::ResourcePool;
use crate::task::{Task, TaskId};

/// Ordered batches of tasks that may run side by side
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionPlan {
    /// Batches in execution order; every task appears exactly once
    pub batches: Vec<Vec<TaskId>>,
    /// Sum over batches of the longest task in the batch
    #[serde(rename = "total_estimated_time_ms", serialize_with = "duration_as_ms")]
    pub total_estimated_time: Duration,
    /// Peak units committed per resource in any single batch
    pub resource_utilization: BTreeMap<String, u32>,
}

fn duration_as_ms<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionPlan {
    pub fn task_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Index of the batch holding `id`
    pub fn batch_of(&self, id: &TaskId) -> Option<usize> {
        self.batches.iter().position(|batch| batch.contains(id))
    }

    /// Human-readable summary of the plan
    pub fn describe(&self, tasks: &HashMap<TaskId, Task>) -> String {
        let mut out = String::new();
        for (i, batch) in self.batches.iter().enumerate() {
            let _ = writeln!(out, "Batch {} ({} tasks):", i, batch.len());
            for id in batch {
                let Some(task) = tasks.get(id) else { continue };
                let resources: Vec<&str> = task
                    .required_resources
                    .iter()
                    .map(|r| r.name.as_str())
                    .collect();
                let _ = write!(
                    out,
                    "  {} [{}, {}ms] uses {}",
                    id,
                    task.task_type,
                    task.estimated_duration.as_millis(),
                    resources.join(", ")
                );
                if task.dependencies.is_empty() {
                    out.push('\n');
                } else {
                    let deps: Vec<&str> = task.dependencies.iter().map(TaskId::as_str).collect();
                    let _ = writeln!(out, " (after: {})", deps.join(", "));
                }
            }
        }
        let _ = writeln!(
            out,
            "Estimated time: {}ms",
            self.total_estimated_time.as_millis()
        );
        out
    }
}

/// Resources committed by the batch under construction
#[derive(Default)]
struct BatchLoad {
    units: HashMap<String, u32>,
    exclusive: HashSet<String>,
}

impl BatchLoad {
    fn admits(&self, task: &Task, pool: &ResourcePool) -> bool {
        task.required_resources.iter().all(|request| {
            let used = self.units.get(&request.name).copied().unwrap_or(0);
            let exclusive = request.exclusive || pool.is_exclusive(&request.name);

            if self.exclusive.contains(&request.name) || (exclusive && used > 0) {
                return false;
            }
            match pool.get(&request.name) {
                Some(declared) => used + request.capacity <= declared.capacity,
                None => true,
            }
        })
    }

    fn commit(&mut self, task: &Task, pool: &ResourcePool) {
        for request in &task.required_resources {
            *self.units.entry(request.name.clone()).or_insert(0) += request.capacity;
            if request.exclusive || pool.is_exclusive(&request.name) {
                self.exclusive.insert(request.name.clone());
            }
        }
    }
}

/// Partition `task_ids` into dependency-ordered, resource-respecting batches.
///
/// Dependencies on tasks outside the set are ignored here; the scheduler checks
/// them when the task is dispatched.
#[instrument(skip_all, fields(tasks = task_ids.len()))]
pub fn create_execution_plan(
    task_ids: &[TaskId],
    tasks: &HashMap<TaskId, Task>,
    pool: &ResourcePool,
) -> Result<ExecutionPlan> {
    let mut seen = HashSet::new();
    let mut unplaced: Vec<&Task> = Vec::with_capacity(task_ids.len());
    for id in task_ids {
        let task = tasks
            .get(id)
            .ok_or_else(|| SchedulerError::UnknownTask(id.clone()))?;
        if seen.insert(id) {
            unplaced.push(task);
        }
    }
    let in_set: HashSet<&TaskId> = seen;

    let mut placed: HashSet<TaskId> = HashSet::new();
    let mut plan = ExecutionPlan::default();

    while !unplaced.is_empty() {
        let mut load = BatchLoad::default();
        let mut batch: Vec<&Task> = Vec::new();

        unplaced.retain(|task| {
            let ready = task
                .dependencies
                .iter()
                .all(|dep| !in_set.contains(dep) || placed.contains(dep));
            if ready && load.admits(task, pool) {
                load.commit(task, pool);
                batch.push(*task);
                false
            } else {
                true
            }
        });

        if batch.is_empty() {
            let forced = force_pick(&unplaced, &placed, &in_set);
            let task = unplaced.remove(forced);
            warn!(task_id = %task.id, "no task fits the batch, forcing placement");
            load.commit(task, pool);
            batch.push(task);
        }

        let longest = batch
            .iter()
            .map(|t| t.estimated_duration)
            .max()
            .unwrap_or_default();
        plan.total_estimated_time += longest;

        for (name, units) in load.units {
            let peak = plan.resource_utilization.entry(name).or_insert(0);
            *peak = (*peak).max(units);
        }

        placed.extend(batch.iter().map(|t| t.id.clone()));
        plan.batches.push(batch.into_iter().map(|t| t.id.clone()).collect());
    }

    info!(
        batch_count = plan.batches.len(),
        estimated_ms = plan.total_estimated_time.as_millis() as u64,
        "execution plan created"
    );
    Ok(plan)
}

/// Index of the task to force into an otherwise empty batch: lowest priority
/// value, preferring tasks whose in-set dependencies are already placed
fn force_pick(unplaced: &[&Task], placed: &HashSet<TaskId>, in_set: &HashSet<&TaskId>) -> usize {
    let deps_placed = |task: &Task| {
        task.dependencies
            .iter()
            .all(|dep| !in_set.contains(dep) || placed.contains(dep))
    };

    let pick = |require_deps: bool| {
        unplaced
            .iter()
            .enumerate()
            .filter(|(_, task)| !require_deps || deps_placed(task))
            .min_by_key(|(_, task)| task.priority)
            .map(|(i, _)| i)
    };

    pick(true).or_else(|| pick(false)).unwrap_or(0)
}
