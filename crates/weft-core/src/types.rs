//! Core types for Weft

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of contention domain a resource models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Files or directories on disk
    FileSystem,
    /// A database instance
    Database,
    /// Network bandwidth or endpoints
    Network,
    /// CPU cores
    Cpu,
    /// Memory
    Memory,
    /// A worker agent
    Agent,
    /// Build tooling (compilers, pipelines)
    BuildSystem,
    /// A test environment
    TestEnvironment,
}

impl ResourceType {
    /// Returns the string representation of the resource type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileSystem => "file_system",
            Self::Database => "database",
            Self::Network => "network",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Agent => "agent",
            Self::BuildSystem => "build_system",
            Self::TestEnvironment => "test_environment",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "file_system" | "fs" => Ok(Self::FileSystem),
            "database" | "db" => Ok(Self::Database),
            "network" => Ok(Self::Network),
            "cpu" => Ok(Self::Cpu),
            "memory" => Ok(Self::Memory),
            "agent" => Ok(Self::Agent),
            "build_system" => Ok(Self::BuildSystem),
            "test_environment" => Ok(Self::TestEnvironment),
            _ => Err(format!("Unknown resource type: {}", s)),
        }
    }
}

/// A named capacity unit.
///
/// The same shape describes both a pool entry (where `capacity` is the total
/// number of units available) and a task's request (where `capacity` is the
/// number of units the task needs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Kind of resource
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Unique key into the resource pool
    pub name: String,
    /// Capacity in integer units
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// At most one concurrent holder regardless of capacity
    #[serde(default)]
    pub exclusive: bool,
}

fn default_capacity() -> u32 {
    1
}

impl Resource {
    /// Create a shared resource
    pub fn shared(resource_type: ResourceType, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            resource_type,
            name: name.into(),
            capacity,
            exclusive: false,
        }
    }

    /// Create an exclusive resource with a single unit of capacity
    pub fn exclusive(resource_type: ResourceType, name: impl Into<String>) -> Self {
        Self {
            resource_type,
            name: name.into(),
            capacity: 1,
            exclusive: true,
        }
    }

    /// Set the capacity
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exclusive {
            write!(f, "{} ({}, exclusive)", self.name, self.resource_type)
        } else {
            write!(f, "{} ({} x{})", self.name, self.resource_type, self.capacity)
        }
    }
}
