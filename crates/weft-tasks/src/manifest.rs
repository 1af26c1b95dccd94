//! Task manifests for bulk submission

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::WeftError;

use crate::error::{Result, SchedulerError};
use crate::task::{Task, TaskId};

/// A file listing tasks to submit together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl TaskManifest {
    /// Load a manifest; `.toml` files are parsed as TOML, anything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "loading task manifest");
        let content = std::fs::read_to_string(path).map_err(WeftError::from)?;

        let manifest = if path.extension().is_some_and(|e| e == "toml") {
            Self::from_toml(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        debug!(tasks = manifest.tasks.len(), "manifest loaded");
        Ok(manifest)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content).map_err(|e| SchedulerError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(content).map_err(|e| SchedulerError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check every task's own fields and that ids are unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            task.validate()?;
            if !seen.insert(&task.id) {
                return Err(SchedulerError::Manifest(format!("duplicate task id '{}'", task.id)));
            }
        }
        Ok(())
    }

    /// Task ids in declaration order
    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::task::{Priority, TaskType};

    const TOML_MANIFEST: &str = r#"
[[tasks]]
id = "compile"
name = "Compile workspace"
type = "build"
priority = "high"
estimated_duration_ms = 1200
required_resources = [{ type = "build_system", name = "build-pipeline" }]

[[tasks]]
id = "unit"
name = "Unit tests"
type = "testing"
estimated_duration_ms = 800
dependencies = ["compile"]
required_resources = [{ type = "test_environment", name = "test-env", capacity = 2 }]
"#;

    #[test]
    fn test_parse_toml() {
        let manifest = TaskManifest::from_toml(TOML_MANIFEST).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.ids(), vec![TaskId::new("compile"), TaskId::new("unit")]);

        let compile = &manifest.tasks[0];
        assert_eq!(compile.task_type, TaskType::Build);
        assert_eq!(compile.priority, Priority::High);
        assert_eq!(compile.estimated_duration, Duration::from_millis(1200));

        let unit = &manifest.tasks[1];
        assert!(unit.dependencies.contains(&TaskId::new("compile")));
        assert_eq!(unit.required_resources[0].capacity, 2);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
tasks:
  - id: docs
    name: Write docs
    type: documentation
    estimated_duration_ms: 500
    agent_id: architect
    required_resources:
      - type: file_system
        name: project-files
"#;
        let manifest = TaskManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.tasks[0].agent_id.as_deref(), Some("architect"));
        assert_eq!(manifest.tasks[0].priority, Priority::Medium);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
tasks:
  - { id: a, name: A, type: build, estimated_duration_ms: 1, required_resources: [{ type: cpu, name: cpu-cores }] }
  - { id: a, name: B, type: build, estimated_duration_ms: 1, required_resources: [{ type: cpu, name: cpu-cores }] }
"#;
        let err = TaskManifest::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SchedulerError::Manifest(msg) if msg.contains("duplicate task id 'a'")));
    }

    #[test]
    fn test_invalid_task_rejected() {
        let yaml = r#"
tasks:
  - { id: a, name: A, type: build, estimated_duration_ms: 0, required_resources: [{ type: cpu, name: cpu-cores }] }
"#;
        assert!(matches!(
            TaskManifest::from_yaml(yaml),
            Err(SchedulerError::Validation(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.toml");
        std::fs::write(&path, TOML_MANIFEST).unwrap();

        let manifest = TaskManifest::load(&path).unwrap();
        assert_eq!(manifest.len(), 2);

        let missing = TaskManifest::load(&dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(SchedulerError::Core(WeftError::Io(_)))));
    }
}
