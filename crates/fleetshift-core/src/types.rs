//! Cluster object model.
//!
//! These types mirror the subset of the cluster API that a rollout touches:
//! workloads (replication controllers), the pods they own by label
//! selection, and the nodes those pods are bound to. All types serialize
//! in the cluster's camelCase wire format so manifests decode directly.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::selector::Selector;

/// Label map. Ordered so rendered selectors are canonical.
pub type Labels = BTreeMap<String, String>;

/// Namespace used when a manifest or request does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The only workload kind a rollout accepts.
pub const WORKLOAD_KIND: &str = "ReplicationController";

/// Field path for the node a pod is bound to.
pub const FIELD_NODE_NAME: &str = "spec.nodeName";
/// Field path for a pod's lifecycle phase.
pub const FIELD_PHASE: &str = "status.phase";
/// Field path for an object's name.
pub const FIELD_NAME: &str = "metadata.name";
/// Field path for an object's namespace.
pub const FIELD_NAMESPACE: &str = "metadata.namespace";

// ── Metadata ──────────────────────────────────────────────────────

/// Identity and bookkeeping shared by every object kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    /// Optimistic concurrency token, assigned by the cluster on every write.
    #[serde(default)]
    pub resource_version: u64,
    /// Set when a graceful delete has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_grace_secs: Option<u64>,
}

impl ObjectMeta {
    pub fn named(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    fn field(&self, path: &str) -> Option<String> {
        match path {
            FIELD_NAME => Some(self.name.clone()),
            FIELD_NAMESPACE => Some(self.namespace.clone()),
            _ => None,
        }
    }
}

/// Behaviour common to every kind stored in the cluster.
pub trait Object:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Kind name, used in logs and error messages.
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;

    /// Resolve a field-selector path against this object.
    fn field(&self, path: &str) -> Option<String> {
        self.meta().field(path)
    }

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> &str {
        &self.meta().namespace
    }

    fn labels(&self) -> &Labels {
        &self.meta().labels
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// A controller object declaring a desired replica count and pod template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default)]
    pub replicas: u32,
    /// Pods whose labels satisfy this map belong to the workload.
    #[serde(default)]
    pub selector: Labels,
    #[serde(default)]
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
}

/// Template stamped onto every pod the workload creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: TemplateMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMeta {
    #[serde(default)]
    pub labels: Labels,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    WORKLOAD_KIND.to_string()
}

impl Workload {
    /// Build a workload whose selector and template labels are both `labels`.
    pub fn new(namespace: &str, name: &str, replicas: u32, labels: Labels) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                labels: labels.clone(),
                ..ObjectMeta::named(namespace, name)
            },
            spec: WorkloadSpec {
                replicas,
                selector: labels.clone(),
                template: PodTemplate {
                    metadata: TemplateMeta { labels },
                    spec: PodSpec::default(),
                },
            },
            status: WorkloadStatus::default(),
        }
    }

    /// Add a node-selector entry to the pod template.
    pub fn with_node_selector(mut self, key: &str, value: &str) -> Self {
        self.spec
            .template
            .spec
            .node_selector
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Selector matching the pods this workload owns.
    pub fn pod_selector(&self) -> Selector {
        Selector::from_map(&self.spec.selector)
    }

    /// Value the pod template requires for a node label, if any.
    pub fn partition_value(&self, key: &str) -> Option<&str> {
        self.spec
            .template
            .spec
            .node_selector
            .get(key)
            .map(String::as_str)
    }
}

impl Object for Workload {
    const KIND: &'static str = "Workload";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ── Pod ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Node labels a node must carry for this pod to be placed there.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: Labels,
    /// Node the pod is bound to, once placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restart_count: u32,
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

impl Pod {
    /// Stamp a new, unscheduled pod from a workload's template.
    pub fn from_template(namespace: &str, name: &str, template: &PodTemplate) -> Self {
        Self {
            metadata: ObjectMeta {
                labels: template.metadata.labels.clone(),
                ..ObjectMeta::named(namespace, name)
            },
            spec: PodSpec {
                node_name: None,
                ..template.spec.clone()
            },
            status: PodStatus::default(),
        }
    }

    pub fn node_name(&self) -> Option<&str> {
        self.spec.node_name.as_deref()
    }

    /// Running with the ready condition set.
    pub fn is_running_and_ready(&self) -> bool {
        self.status.phase == PodPhase::Running && self.status.ready && !self.is_terminating()
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_grace_secs.is_some()
    }
}

impl Object for Pod {
    const KIND: &'static str = "Pod";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn field(&self, path: &str) -> Option<String> {
        match path {
            FIELD_NODE_NAME => Some(self.spec.node_name.clone().unwrap_or_default()),
            FIELD_PHASE => Some(self.status.phase.to_string()),
            _ => self.metadata.field(path),
        }
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A worker node: the capacity unit a by-node rollout migrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default = "default_true")]
    pub ready: bool,
    /// Maximum number of pods the node accepts.
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            ready: true,
            max_pods: default_max_pods(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_pods() -> u32 {
    110
}

impl Node {
    pub fn new(name: &str, labels: Labels) -> Self {
        Self {
            metadata: ObjectMeta {
                labels,
                ..ObjectMeta::named("", name)
            },
            spec: NodeSpec::default(),
            status: NodeStatus::default(),
        }
    }

    pub fn with_max_pods(mut self, max_pods: u32) -> Self {
        self.status.max_pods = max_pods;
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Whether new pods may be placed here.
    pub fn is_schedulable(&self) -> bool {
        self.status.ready && !self.spec.unschedulable
    }
}

impl Object for Node {
    const KIND: &'static str = "Node";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ── Aggregates ────────────────────────────────────────────────────

/// Aggregate pod counts for one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    /// Pods created, as last reported in the workload status.
    pub current: u32,
    /// Pods the workload desires.
    pub desired: u32,
    pub running: u32,
    pub pending: u32,
    pub failed: u32,
}

impl PodInfo {
    pub fn collect(workload: &Workload, pods: &[Pod]) -> Self {
        let mut info = Self {
            current: workload.status.replicas,
            desired: workload.spec.replicas,
            ..Default::default()
        };
        for pod in pods {
            match pod.status.phase {
                PodPhase::Running => info.running += 1,
                PodPhase::Pending => info.pending += 1,
                PodPhase::Failed => info.failed += 1,
                _ => {}
            }
        }
        info
    }
}

/// Build a label map from `(key, value)` pairs.
pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
