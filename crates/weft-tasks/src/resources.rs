//! Resource pool and capacity accounting

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use weft_core::Resource;

use crate::error::{Result, SchedulerError};
use crate::execution::ResourceAllocation;
use crate::task::TaskId;

/// Registry of named, capacity-bounded resources.
///
/// Only the scheduler mutates the pool; allocations are keyed by the task
/// holding them so release is idempotent.
#[derive(Debug, Clone, Default)]
pub struct ResourcePool {
    /// Declared resources by name
    resources: BTreeMap<String, Resource>,
    /// Units currently committed per resource
    committed: HashMap<String, u32>,
    /// Allocations held by each task
    holdings: HashMap<TaskId, Vec<ResourceAllocation>>,
}

impl ResourcePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool seeded with the given resources
    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let mut pool = Self::new();
        for resource in resources {
            pool.register(resource)?;
        }
        Ok(pool)
    }

    /// Register a resource. Names must be unique.
    pub fn register(&mut self, resource: Resource) -> Result<()> {
        if self.resources.contains_key(&resource.name) {
            return Err(SchedulerError::DuplicateResource(resource.name));
        }
        debug!(resource = %resource.name, capacity = resource.capacity, exclusive = resource.exclusive, "registering resource");
        self.resources.insert(resource.name.clone(), resource);
        Ok(())
    }

    /// Look up a resource by name
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Whether the pool knows the resource
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// All declared resources, ordered by name
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Whether the pool declares the named resource exclusive
    pub fn is_exclusive(&self, name: &str) -> bool {
        self.resources.get(name).is_some_and(|r| r.exclusive)
    }

    /// Units currently committed to a resource
    pub fn committed(&self, name: &str) -> u32 {
        self.committed.get(name).copied().unwrap_or(0)
    }

    /// Allocations currently held by a task
    pub fn holdings(&self, task_id: &TaskId) -> &[ResourceAllocation] {
        self.holdings.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Commit a task's resource requests.
    ///
    /// All names and exclusive claims are checked before anything is
    /// committed. A resource held exclusively by one task cannot be claimed by
    /// another until released. A task that already holds resources keeps its
    /// existing allocation.
    pub fn allocate(&mut self, task_id: &TaskId, requests: &[Resource]) -> Result<Vec<ResourceAllocation>> {
        if let Some(existing) = self.holdings.get(task_id) {
            return Ok(existing.clone());
        }

        if let Some(missing) = requests.iter().find(|r| !self.resources.contains_key(&r.name)) {
            return Err(SchedulerError::UnknownResource(missing.name.clone()));
        }
        for request in requests {
            let exclusive = request.exclusive || self.is_exclusive(&request.name);
            if let Some(holder) = self.conflicting_holder(task_id, &request.name, exclusive) {
                debug!(resource = %request.name, task_id = %task_id, holder = %holder, "resource busy");
                return Err(SchedulerError::ResourceBusy {
                    resource: request.name.clone(),
                    holder: holder.clone(),
                });
            }
        }

        let mut allocations = Vec::with_capacity(requests.len());
        for request in requests {
            let exclusive = request.exclusive || self.is_exclusive(&request.name);
            let committed = self.committed.entry(request.name.clone()).or_insert(0);
            *committed += request.capacity;

            if let Some(declared) = self.resources.get(&request.name) {
                if *committed > declared.capacity {
                    warn!(
                        resource = %request.name,
                        committed = *committed,
                        capacity = declared.capacity,
                        task_id = %task_id,
                        "resource over-committed"
                    );
                }
            }

            allocations.push(ResourceAllocation {
                resource: request.name.clone(),
                units: request.capacity,
                exclusive,
            });
        }

        self.holdings.insert(task_id.clone(), allocations.clone());
        Ok(allocations)
    }

    /// Another task whose hold on `name` rules out this claim
    fn conflicting_holder(&self, task_id: &TaskId, name: &str, exclusive: bool) -> Option<&TaskId> {
        self.holdings
            .iter()
            .filter(|(holder, _)| *holder != task_id)
            .find(|(_, allocations)| {
                allocations
                    .iter()
                    .any(|a| a.resource == name && (exclusive || a.exclusive))
            })
            .map(|(holder, _)| holder)
    }

    /// Release everything a task holds. Returns what was released; calling it
    /// again for the same task releases nothing.
    pub fn release(&mut self, task_id: &TaskId) -> Vec<ResourceAllocation> {
        let Some(allocations) = self.holdings.remove(task_id) else {
            return Vec::new();
        };

        for allocation in &allocations {
            if let Some(committed) = self.committed.get_mut(&allocation.resource) {
                *committed = committed.saturating_sub(allocation.units);
            }
        }
        allocations
    }

    /// Utilization per resource as a percentage of declared capacity
    pub fn utilization(&self) -> BTreeMap<String, f64> {
        self.resources
            .iter()
            .map(|(name, resource)| {
                let used = self.committed(name) as f64;
                (name.clone(), used / resource.capacity.max(1) as f64 * 100.0)
            })
            .collect()
    }
}
