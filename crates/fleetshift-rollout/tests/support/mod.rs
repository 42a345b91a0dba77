//! Shared fixtures: a simulated fleet and a call-recording cluster.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use fleetshift_cluster::{
    Cluster, ClusterFuture, ClusterSim, MemoryCluster, ObjectApi, SimSettings, Store, Subscription,
};
use fleetshift_core::{
    labels, parse_workload, ListParams, Node, Object, Pod, Selector, Workload,
};
use fleetshift_rollout::RolloutConfig;

pub const PARTITION: &str = "web_version";

/// Old workload: `app=web,version=v1`, placed on `web_version=v1` nodes.
pub fn web_v1(replicas: u32) -> Workload {
    Workload::new(
        "prod",
        "web-v1",
        replicas,
        labels([("app", "web"), ("version", "v1")]),
    )
    .with_node_selector(PARTITION, "v1")
}

/// Manifest for the replacement workload.
pub fn web_v2_manifest(replicas: u32) -> String {
    format!(
        "\
apiVersion: v1
kind: ReplicationController
metadata:
  name: web-v2
spec:
  replicas: {replicas}
  selector:
    app: web
    version: v2
  template:
    metadata:
      labels:
        app: web
        version: v2
    spec:
      nodeSelector:
        web_version: v2
      containers:
        - name: web
          image: registry.local/web:2.0
"
    )
}

pub fn old_selector() -> Selector {
    Selector::from_map(&labels([("app", "web"), ("version", "v1")]))
}

pub fn new_selector() -> Selector {
    Selector::from_map(&labels([("app", "web"), ("version", "v2")]))
}

/// Short timeouts so failures surface quickly.
pub fn fast_config() -> RolloutConfig {
    RolloutConfig {
        poll_interval: Duration::from_millis(20),
        phase_timeout: Duration::from_secs(5),
        deletion_timeout: Duration::from_secs(5),
        creation_timeout: Duration::from_secs(5),
        grace_period_secs: 0,
        conflict_retries: 5,
    }
}

// ── Simulated fleet ───────────────────────────────────────────────

/// A [`MemoryCluster`] with a [`ClusterSim`] playing the control plane.
pub struct TestFleet {
    pub cluster: MemoryCluster,
    sim: Arc<ClusterSim>,
    shutdown: watch::Sender<bool>,
}

impl TestFleet {
    pub fn new() -> Self {
        let cluster = MemoryCluster::new();
        let settings = SimSettings {
            tick: Duration::from_millis(5),
            startup_ticks: 1,
        };
        let sim = Arc::new(ClusterSim::new(cluster.clone(), settings));
        let (shutdown, _) = watch::channel(false);
        Self {
            cluster,
            sim,
            shutdown,
        }
    }

    pub fn node(self, name: &str, version: &str, max_pods: u32) -> Self {
        let node = Node::new(name, labels([(PARTITION, version)])).with_max_pods(max_pods);
        self.cluster.node_store().create_now("", node).unwrap();
        self
    }

    pub fn workload(self, workload: Workload) -> Self {
        self.cluster.workload_store().create_now("prod", workload).unwrap();
        self
    }

    /// Run reconcile passes until nothing changes.
    pub fn settle(self) -> Self {
        for _ in 0..100 {
            if self.sim.reconcile_once().unwrap().is_idle() {
                return self;
            }
        }
        panic!("cluster did not settle");
    }

    /// Start the background reconcile loop. Stops when the fleet is dropped.
    pub fn start(self) -> Self {
        self.sim.clone().spawn(self.shutdown.subscribe());
        self
    }

    pub fn pods(&self, selector: Selector) -> Vec<Pod> {
        self.cluster
            .pod_store()
            .list_now("prod", &ListParams::labels(selector))
    }

    pub fn ready_pods(&self, selector: Selector) -> Vec<Pod> {
        self.pods(selector)
            .into_iter()
            .filter(|p| p.is_running_and_ready())
            .collect()
    }

    pub fn node_label(&self, name: &str) -> Option<String> {
        self.cluster
            .node_store()
            .get_now("", name)
            .ok()
            .and_then(|n| n.label(PARTITION).map(str::to_string))
    }

    pub fn workload_replicas(&self, name: &str) -> Option<u32> {
        self.cluster
            .workload_store()
            .get_now("prod", name)
            .ok()
            .map(|w| w.spec.replicas)
    }

    /// Create the new workload directly, as an interrupted rollout would have.
    pub fn precreate_new(self, replicas: u32) -> Self {
        let workload = parse_workload(&web_v2_manifest(replicas)).unwrap();
        self.workload(workload)
    }
}

impl Drop for TestFleet {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Two `v1` nodes holding two `web-v1` pods each, all ready.
pub fn scenario_a() -> TestFleet {
    TestFleet::new()
        .node("node-a", "v1", 2)
        .node("node-b", "v1", 2)
        .workload(web_v1(4))
        .settle()
}

// ── Recording cluster ─────────────────────────────────────────────

/// One facade call, with the cluster state just before it took effect.
#[derive(Debug, Clone)]
pub struct Call {
    pub op: &'static str,
    pub kind: &'static str,
    /// Object name, or the filter for watches.
    pub target: String,
    /// Object written by a create or update.
    pub object: Option<serde_json::Value>,
    pub pods: Vec<Pod>,
    pub workloads: Vec<Workload>,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self.op, "create" | "update" | "delete")
    }

    /// Node a deleted pod was bound to.
    pub fn deleted_pod_node(&self) -> Option<&str> {
        self.pods
            .iter()
            .find(|p| p.name() == self.target)
            .and_then(|p| p.node_name())
    }

    pub fn written_label(&self, key: &str) -> Option<&str> {
        self.object.as_ref()?["metadata"]["labels"][key].as_str()
    }

    pub fn written_replicas(&self) -> Option<u64> {
        self.object.as_ref()?["spec"]["replicas"].as_u64()
    }

    pub fn replicas_before(&self, workload: &str) -> Option<u32> {
        self.workloads
            .iter()
            .find(|w| w.name() == workload)
            .map(|w| w.spec.replicas)
    }
}

type Log = Arc<Mutex<Vec<Call>>>;

struct Recorder<K: Object> {
    inner: Store<K>,
    world: MemoryCluster,
    log: Log,
}

impl<K: Object> Recorder<K> {
    fn record(&self, op: &'static str, target: &str, object: Option<&K>) {
        let call = Call {
            op,
            kind: K::KIND,
            target: target.to_string(),
            object: object.map(|o| serde_json::to_value(o).unwrap()),
            pods: self.world.pod_store().list_now("", &ListParams::default()),
            workloads: self.world.workload_store().list_now("", &ListParams::default()),
        };
        self.log.lock().unwrap().push(call);
    }
}

impl<K: Object> ObjectApi<K> for Recorder<K> {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, K> {
        self.inner.get(namespace, name)
    }

    fn list<'a>(&'a self, namespace: &'a str, params: &'a ListParams) -> ClusterFuture<'a, Vec<K>> {
        self.inner.list(namespace, params)
    }

    fn create<'a>(&'a self, namespace: &'a str, obj: K) -> ClusterFuture<'a, K> {
        self.record("create", obj.name(), Some(&obj));
        self.inner.create(namespace, obj)
    }

    fn update<'a>(&'a self, namespace: &'a str, obj: K) -> ClusterFuture<'a, K> {
        self.record("update", obj.name(), Some(&obj));
        self.inner.update(namespace, obj)
    }

    fn delete<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        grace_period_secs: Option<u64>,
    ) -> ClusterFuture<'a, ()> {
        self.record("delete", name, None);
        self.inner.delete(namespace, name, grace_period_secs)
    }

    fn watch<'a>(
        &'a self,
        namespace: &'a str,
        params: &'a ListParams,
    ) -> ClusterFuture<'a, Subscription<K>> {
        self.record("watch", &params.to_string(), None);
        self.inner.watch(namespace, params)
    }
}

/// Cluster wrapper that logs every create, update, delete and watch.
pub struct RecordingCluster {
    workloads: Recorder<Workload>,
    pods: Recorder<Pod>,
    nodes: Recorder<Node>,
    log: Log,
}

impl RecordingCluster {
    pub fn new(world: &MemoryCluster) -> Self {
        let log = Log::default();
        Self {
            workloads: Recorder {
                inner: world.workload_store().clone(),
                world: world.clone(),
                log: log.clone(),
            },
            pods: Recorder {
                inner: world.pod_store().clone(),
                world: world.clone(),
                log: log.clone(),
            },
            nodes: Recorder {
                inner: world.node_store().clone(),
                world: world.clone(),
                log: log.clone(),
            },
            log,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }
}

impl Cluster for RecordingCluster {
    fn workloads(&self) -> &dyn ObjectApi<Workload> {
        &self.workloads
    }

    fn pods(&self) -> &dyn ObjectApi<Pod> {
        &self.pods
    }

    fn nodes(&self) -> &dyn ObjectApi<Node> {
        &self.nodes
    }
}
