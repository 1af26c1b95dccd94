//! Per-agent workload bookkeeping

use std::collections::{BTreeMap, HashMap};

/// Counts of running tasks per agent.
///
/// Pure bookkeeping: limits are enforced by the collision detector.
#[derive(Debug, Clone, Default)]
pub struct AgentWorkload {
    counts: HashMap<String, usize>,
}

impl AgentWorkload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task starting for `agent`
    pub fn increment(&mut self, agent: &str) -> usize {
        let count = self.counts.entry(agent.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a task finishing for `agent`; never goes below zero
    pub fn decrement(&mut self, agent: &str) -> usize {
        match self.counts.get_mut(agent) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        }
    }

    /// Running tasks owned by `agent`
    pub fn load(&self, agent: &str) -> usize {
        self.counts.get(agent).copied().unwrap_or(0)
    }

    /// Snapshot of every agent seen so far
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Least-loaded agent among `candidates`; ties go to the earliest candidate
    pub fn least_loaded<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        candidates
            .iter()
            .min_by_key(|agent| self.load(agent))
            .map(String::as_str)
    }
}
