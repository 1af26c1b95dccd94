//! Task types and definitions

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use weft_core::Resource;

use crate::error::ValidationError;

/// Unique identifier for a task
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new task ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ID of the `index`-th subtask produced by splitting this task
    pub fn subtask(&self, index: usize) -> Self {
        Self(format!("{}_subtask_{}", self.0, index))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of work a task performs; selects the handler that executes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Development,
    Testing,
    Build,
    Deployment,
    QualityAssurance,
    Documentation,
    Analysis,
    Monitoring,
    Security,
}

impl TaskType {
    /// Every task type, in declaration order
    pub const ALL: [TaskType; 9] = [
        Self::Development,
        Self::Testing,
        Self::Build,
        Self::Deployment,
        Self::QualityAssurance,
        Self::Documentation,
        Self::Analysis,
        Self::Monitoring,
        Self::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Build => "build",
            Self::Deployment => "deployment",
            Self::QualityAssurance => "quality_assurance",
            Self::Documentation => "documentation",
            Self::Analysis => "analysis",
            Self::Monitoring => "monitoring",
            Self::Security => "security",
        }
    }

    /// Number of pieces a task of this type is cut into when split.
    ///
    /// Builds, deployments, monitoring and security scans are atomic.
    pub fn split_factor(&self) -> usize {
        match self {
            Self::Development => 4,
            Self::Testing => 3,
            Self::QualityAssurance | Self::Documentation | Self::Analysis => 2,
            Self::Build | Self::Deployment | Self::Monitoring | Self::Security => 1,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown task type: {}", s))
    }
}

/// Scheduling priority; a lower value means more urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
    Background = 5,
}

impl Priority {
    /// Numeric ordinal (1 = critical … 5 = background)
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Background => "background",
        };
        f.write_str(name)
    }
}

/// Development lifecycle stage, ordered from planning to maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdlcPhase {
    Planning,
    Analysis,
    Design,
    Implementation,
    Testing,
    Deployment,
    Maintenance,
}

impl Default for SdlcPhase {
    fn default() -> Self {
        Self::Implementation
    }
}

impl fmt::Display for SdlcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::Analysis => "analysis",
            Self::Design => "design",
            Self::Implementation => "implementation",
            Self::Testing => "testing",
            Self::Deployment => "deployment",
            Self::Maintenance => "maintenance",
        };
        f.write_str(name)
    }
}

/// Advisory classification of how likely a task is to collide
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionRisk {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Scheduler-owned side table attached to each task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    /// Delay to honor before dispatch, set when a collision reschedules the task
    #[serde(
        rename = "scheduled_delay_ms",
        with = "option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduled_delay: Option<Duration>,

    /// Task this one was split from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task: Option<TaskId>,

    /// Position within the split chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_index: Option<usize>,

    /// Opaque caller-supplied values
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A unit of schedulable work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Human-readable name
    pub name: String,

    /// Kind of work
    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,

    /// Expected run time
    #[serde(rename = "estimated_duration_ms", with = "duration_ms")]
    pub estimated_duration: Duration,

    /// Resources the task needs while running, in declaration order
    #[serde(default)]
    pub required_resources: Vec<Resource>,

    /// Tasks that must complete before this one starts
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,

    /// Owning worker, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Lifecycle stage
    #[serde(default)]
    pub sdlc_phase: SdlcPhase,

    /// Advisory collision risk
    #[serde(default)]
    pub collision_risk: CollisionRisk,

    /// Scheduler side table and opaque values
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl Task {
    /// Create a task with medium priority in the implementation phase
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        task_type: TaskType,
        estimated_duration: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            task_type,
            priority: Priority::default(),
            estimated_duration,
            required_resources: Vec::new(),
            dependencies: BTreeSet::new(),
            agent_id: None,
            sdlc_phase: SdlcPhase::default(),
            collision_risk: CollisionRisk::default(),
            metadata: TaskMetadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a resource request
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.required_resources.push(resource);
        self
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dep: impl Into<TaskId>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_phase(mut self, phase: SdlcPhase) -> Self {
        self.sdlc_phase = phase;
        self
    }

    pub fn with_collision_risk(mut self, risk: CollisionRisk) -> Self {
        self.collision_risk = risk;
        self
    }

    /// Check the task's own fields.
    ///
    /// Resource names are checked against the pool by the scheduler.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName(self.id.clone()));
        }
        if self.estimated_duration.is_zero() {
            return Err(ValidationError::NonPositiveDuration(self.id.clone()));
        }
        if self.required_resources.is_empty() {
            return Err(ValidationError::NoResources(self.id.clone()));
        }
        if let Some(res) = self.required_resources.iter().find(|r| r.capacity == 0) {
            return Err(ValidationError::ZeroCapacityRequest {
                task: self.id.clone(),
                resource: res.name.clone(),
            });
        }
        Ok(())
    }

    /// Whether this task requests the named resource
    pub fn requests(&self, resource: &str) -> Option<&Resource> {
        self.required_resources.iter().find(|r| r.name == resource)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::ResourceType;

    fn sample() -> Task {
        Task::new("t1", "compile", TaskType::Build, Duration::from_millis(500))
            .with_resource(Resource::exclusive(ResourceType::BuildSystem, "build-pipeline"))
    }

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new("core-build");
        assert_eq!(id.to_string(), "core-build");
        assert_eq!(id.subtask(2).as_str(), "core-build_subtask_2");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::Background);
        assert_eq!(Priority::Critical.value(), 1);
        assert_eq!(Priority::Background.value(), 5);
    }

    #[test]
    fn test_sdlc_phase_ordering() {
        assert!(SdlcPhase::Planning < SdlcPhase::Analysis);
        assert!(SdlcPhase::Implementation < SdlcPhase::Testing);
        assert!(SdlcPhase::Deployment < SdlcPhase::Maintenance);
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!(
            "quality-assurance".parse::<TaskType>().unwrap(),
            TaskType::QualityAssurance
        );
        assert!("gardening".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_split_factor_bounds() {
        for task_type in TaskType::ALL {
            assert!((1..=4).contains(&task_type.split_factor()));
        }
    }

    #[test]
    fn test_task_builder() {
        let task = sample()
            .with_priority(Priority::High)
            .with_dependency("t0")
            .with_agent("developer")
            .with_phase(SdlcPhase::Testing);

        assert_eq!(task.priority, Priority::High);
        assert!(task.dependencies.contains(&TaskId::new("t0")));
        assert_eq!(task.agent_id.as_deref(), Some("developer"));
        assert!(task.requests("build-pipeline").is_some());
        assert!(task.requests("test-env").is_none());
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut task = sample();
        task.name = " ".to_string();
        assert!(matches!(task.validate(), Err(ValidationError::EmptyName(_))));

        let task = Task::new("t2", "x", TaskType::Build, Duration::ZERO)
            .with_resource(Resource::shared(ResourceType::Cpu, "cpu-cores", 1));
        assert!(matches!(
            task.validate(),
            Err(ValidationError::NonPositiveDuration(_))
        ));

        let task = Task::new("t3", "x", TaskType::Build, Duration::from_millis(1));
        assert!(matches!(task.validate(), Err(ValidationError::NoResources(_))));

        let task = Task::new("", "x", TaskType::Build, Duration::from_millis(1));
        assert!(matches!(task.validate(), Err(ValidationError::EmptyId)));
    }

    #[test]
    fn test_task_deserialize_from_toml() {
        let task: Task = toml::from_str(
            r#"
            id = "lint"
            name = "Lint sources"
            type = "quality_assurance"
            priority = "high"
            estimated_duration_ms = 1500
            dependencies = ["build"]
            sdlc_phase = "testing"

            [[required_resources]]
            type = "cpu"
            name = "cpu-cores"
            capacity = 2
            "#,
        )
        .unwrap();

        assert_eq!(task.task_type, TaskType::QualityAssurance);
        assert_eq!(task.estimated_duration, Duration::from_millis(1500));
        assert_eq!(task.required_resources[0].capacity, 2);
        assert_eq!(task.metadata, TaskMetadata::default());
    }
}
