//! Default configuration values

use crate::types::{Resource, ResourceType};

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "weft.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "weft.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".weft.toml",
        ".weft.yaml",
    ]
}

/// Resources seeded into every pool unless the config overrides them
pub fn default_resources() -> Vec<Resource> {
    vec![
        Resource::shared(ResourceType::Cpu, "cpu-cores", 8),
        Resource::shared(ResourceType::Memory, "system-memory", 16),
        Resource::exclusive(ResourceType::FileSystem, "project-files"),
        Resource::shared(ResourceType::Database, "test-db", 10),
        Resource::exclusive(ResourceType::BuildSystem, "build-pipeline"),
        Resource::shared(ResourceType::TestEnvironment, "test-env", 5),
    ]
}

/// Agents available for reassignment by default
pub fn default_agent_pool() -> Vec<String> {
    ["architect", "developer", "tester", "reviewer", "operator"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Weft Configuration

[scheduler]
max_parallel_tasks = 10
auto_dispatch = true

[agents]
pool = ["architect", "developer", "tester", "reviewer", "operator"]
max_concurrent_tasks = 3

[collision]
base_delay_ms = 1000
serialize_timeout_secs = 300

[splitting]
max_subtasks = 4

[monitoring]
snapshot_interval_ms = 5000

[[resources]]
type = "cpu"
name = "cpu-cores"
capacity = 8

[[resources]]
type = "memory"
name = "system-memory"
capacity = 16

[[resources]]
type = "file_system"
name = "project-files"
capacity = 1
exclusive = true

[[resources]]
type = "database"
name = "test-db"
capacity = 10

[[resources]]
type = "build_system"
name = "build-pipeline"
capacity = 1
exclusive = true

[[resources]]
type = "test_environment"
name = "test-env"
capacity = 5
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_resources_seeded() {
        let resources = default_resources();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "cpu-cores",
                "system-memory",
                "project-files",
                "test-db",
                "build-pipeline",
                "test-env"
            ]
        );
        assert!(resources.iter().any(|r| r.name == "build-pipeline" && r.exclusive));
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.scheduler.max_parallel_tasks, 10);
        assert_eq!(config.resources, default_resources());
        assert_eq!(config.agents.pool, default_agent_pool());
    }

    #[test]
    fn test_generated_toml_round_trips() {
        let generated = default_config_toml();
        let config: Config = toml::from_str(&generated).unwrap();
        assert_eq!(config.collision.base_delay_ms, 1000);
    }
}
