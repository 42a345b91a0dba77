//! fleet.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{parse_workload, ManifestError};
use crate::types::{Labels, Node, Workload, DEFAULT_NAMESPACE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("seed manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        source: ManifestError,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub rollout: RolloutDefaults,
    pub simulator: SimulatorConfig,
    pub seed: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Defaults applied to rollout requests that leave a field at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutDefaults {
    /// Node label key that routes pods between old and new workloads.
    pub partition_label: Option<String>,
    pub poll_interval_secs: u64,
    pub phase_timeout_secs: u64,
    pub deletion_timeout_secs: u64,
    pub creation_timeout_secs: u64,
    pub grace_period_secs: u64,
    pub conflict_retries: u32,
    /// Transitional node label value used while a node drains.
    pub quarantine_value: Option<String>,
}

impl Default for RolloutDefaults {
    fn default() -> Self {
        Self {
            partition_label: None,
            poll_interval_secs: 3,
            phase_timeout_secs: 300,
            deletion_timeout_secs: 600,
            creation_timeout_secs: 900,
            grace_period_secs: 0,
            conflict_retries: 5,
            quarantine_value: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub tick_ms: u64,
    /// Ticks a bound pod spends pending before it runs.
    pub startup_ticks: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            startup_ticks: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub nodes: Vec<SeedNode>,
    pub workloads: Vec<SeedWorkload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    pub max_pods: Option<u32>,
    #[serde(default = "default_ready")]
    pub ready: bool,
}

fn default_ready() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedWorkload {
    /// Manifest path, relative to the config file.
    pub manifest: PathBuf,
    pub namespace: Option<String>,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Nodes declared in `[[seed.nodes]]`.
    pub fn seed_nodes(&self) -> Vec<Node> {
        self.seed
            .nodes
            .iter()
            .map(|seed| {
                let mut node = Node::new(&seed.name, seed.labels.clone());
                if let Some(max) = seed.max_pods {
                    node.status.max_pods = max;
                }
                node.status.ready = seed.ready;
                node
            })
            .collect()
    }

    /// Decode every `[[seed.workloads]]` manifest, resolving paths against `base_dir`.
    pub fn seed_workloads(&self, base_dir: &Path) -> Result<Vec<Workload>, ConfigError> {
        let mut workloads = Vec::with_capacity(self.seed.workloads.len());
        for seed in &self.seed.workloads {
            let path = base_dir.join(&seed.manifest);
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let mut workload = parse_workload(&content)
                .map_err(|source| ConfigError::Manifest { path, source })?;
            workload.metadata.namespace = seed
                .namespace
                .clone()
                .or_else(|| Some(workload.metadata.namespace.clone()).filter(|ns| !ns.is_empty()))
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
            workloads.push(workload);
        }
        Ok(workloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_rollout_conventions() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config.rollout.poll_interval_secs, 3);
        assert_eq!(config.rollout.phase_timeout_secs, 300);
        assert_eq!(config.rollout.deletion_timeout_secs, 600);
        assert_eq!(config.rollout.creation_timeout_secs, 900);
        assert_eq!(config.server.listen, "127.0.0.1:9090");
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:8080"

[rollout]
partition_label = "web_version"
poll_interval_secs = 1
conflict_retries = 2

[simulator]
tick_ms = 10

[[seed.nodes]]
name = "node-a"
labels = { web = "true", web_version = "v1" }
max_pods = 2

[[seed.nodes]]
name = "node-b"
ready = false
"#;
        let config = FleetConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.rollout.partition_label.as_deref(), Some("web_version"));
        assert_eq!(config.rollout.conflict_retries, 2);
        assert_eq!(config.rollout.creation_timeout_secs, 900);
        assert_eq!(config.simulator.tick_ms, 10);
        assert_eq!(config.simulator.startup_ticks, 2);

        let nodes = config.seed_nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].label("web_version"), Some("v1"));
        assert_eq!(nodes[0].status.max_pods, 2);
        assert!(!nodes[1].status.ready);
    }

    #[test]
    fn seed_workloads_resolve_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("web.yaml"),
            "kind: ReplicationController\nmetadata: {name: web-v1}\n\
             spec: {replicas: 2, selector: {app: web}, template: {metadata: {labels: {app: web}}}}\n",
        )
        .unwrap();
        let config_path = dir.path().join("fleet.toml");
        std::fs::write(
            &config_path,
            "[[seed.workloads]]\nmanifest = \"web.yaml\"\nnamespace = \"prod\"\n",
        )
        .unwrap();

        let config = FleetConfig::from_file(&config_path).unwrap();
        let workloads = config.seed_workloads(dir.path()).unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].metadata.namespace, "prod");
        assert_eq!(workloads[0].spec.replicas, 2);
    }

    #[test]
    fn missing_manifest_is_io_error() {
        let config = FleetConfig::from_toml_str("[[seed.workloads]]\nmanifest = \"nope.yaml\"\n")
            .unwrap();
        let err = config.seed_workloads(Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = FleetConfig::default();
        let text = config.to_toml_string().unwrap();
        let back = FleetConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.rollout.deletion_timeout_secs, 600);
    }
}
