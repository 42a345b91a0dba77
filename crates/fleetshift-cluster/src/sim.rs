//! ClusterSim — stand-in for the cluster's own controllers.
//!
//! A [`MemoryCluster`] stores objects but does nothing with them. The
//! simulator adds the behaviour a real control plane provides, one
//! reconcile pass per tick:
//!
//! 1. garbage collection: terminating pods and pods bound to vanished
//!    nodes are removed
//! 2. replication: each workload gets exactly `spec.replicas` live pods
//!    matching its selector
//! 3. placement: unbound pods are bound to a ready node whose labels
//!    satisfy the pod's node selector and that has free capacity
//! 4. kubelet: bound pods start after `startup_ticks` ticks on a ready
//!    node; pods on a node that is not ready lose readiness

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use fleetshift_core::config::SimulatorConfig;
use fleetshift_core::{ListParams, Node, Object, Pod, PodPhase, Selector, Workload};

use crate::error::ClusterResult;
use crate::memory::MemoryCluster;

/// Timing knobs for the simulator.
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub tick: Duration,
    pub startup_ticks: u32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            startup_ticks: 2,
        }
    }
}

impl From<&SimulatorConfig> for SimSettings {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.tick_ms.max(1)),
            startup_ticks: config.startup_ticks,
        }
    }
}

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimReport {
    pub created: u32,
    pub deleted: u32,
    pub bound: u32,
    pub started: u32,
    pub collected: u32,
}

impl SimReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Default)]
struct SimState {
    /// Ticks each bound, not-yet-running pod has waited.
    waiting: HashMap<(String, String), u32>,
    next_suffix: u64,
}

pub struct ClusterSim {
    cluster: MemoryCluster,
    settings: SimSettings,
    state: Mutex<SimState>,
}

impl ClusterSim {
    pub fn new(cluster: MemoryCluster, settings: SimSettings) -> Self {
        Self {
            cluster,
            settings,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    /// Run reconcile passes on every tick until `shutdown` flips or its sender drops.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.tick);
            debug!(tick_ms = self.settings.tick.as_millis() as u64, "cluster simulator started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.reconcile_once() {
                            Ok(report) if !report.is_idle() => debug!(?report, "simulator reconciled"),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "simulator reconcile failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("cluster simulator shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One full reconcile pass.
    pub fn reconcile_once(&self) -> ClusterResult<SimReport> {
        let mut report = SimReport::default();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let nodes: BTreeMap<String, Node> = self
            .cluster
            .node_store()
            .list_now("", &ListParams::default())
            .into_iter()
            .map(|n| (n.metadata.name.clone(), n))
            .collect();

        self.collect_garbage(&nodes, &mut report)?;
        self.replicate(&mut state, &mut report)?;
        self.place(&nodes, &mut state, &mut report)?;
        self.run_kubelet(&nodes, &mut state, &mut report)?;

        let pods = self.cluster.pod_store();
        state
            .waiting
            .retain(|(ns, name), _| pods.get_now(ns, name).is_ok());
        Ok(report)
    }

    fn collect_garbage(&self, nodes: &BTreeMap<String, Node>, report: &mut SimReport) -> ClusterResult<()> {
        let pods = self.cluster.pod_store();
        for pod in pods.list_now("", &ListParams::default()) {
            let orphaned = pod.node_name().is_some_and(|n| !nodes.contains_key(n));
            if pod.is_terminating() || orphaned {
                pods.delete_now(pod.namespace(), pod.name(), None)?;
                report.collected += 1;
            }
        }
        Ok(())
    }

    fn replicate(&self, state: &mut SimState, report: &mut SimReport) -> ClusterResult<()> {
        let pods = self.cluster.pod_store();
        for workload in self.cluster.workload_store().list_now("", &ListParams::default()) {
            let ns = workload.namespace().to_string();
            let selector = ListParams::labels(Selector::from_map(&workload.spec.selector));
            let mut live: Vec<Pod> = pods
                .list_now(&ns, &selector)
                .into_iter()
                .filter(|p| !p.is_terminating())
                .collect();
            let desired = workload.spec.replicas as usize;

            if live.len() < desired {
                for _ in live.len()..desired {
                    let name = self.next_pod_name(state, &workload);
                    let pod = Pod::from_template(&ns, &name, &workload.spec.template);
                    live.push(pods.create_now(&ns, pod)?);
                    report.created += 1;
                }
            } else if live.len() > desired {
                // Cheapest pods go first: unbound, then not running, then not ready, then newest.
                live.sort_by_key(|p| {
                    (
                        p.node_name().is_some(),
                        p.status.phase == PodPhase::Running,
                        p.status.ready,
                        Reverse(p.metadata.resource_version),
                    )
                });
                let excess = live.len() - desired;
                for pod in live.drain(..excess) {
                    pods.delete_now(&ns, pod.name(), None)?;
                    report.deleted += 1;
                }
            }

            let replicas = live.len() as u32;
            let ready = live.iter().filter(|p| p.is_running_and_ready()).count() as u32;
            if workload.status.replicas != replicas || workload.status.ready_replicas != ready {
                let mut updated = workload.clone();
                updated.status.replicas = replicas;
                updated.status.ready_replicas = ready;
                self.cluster.workload_store().update_now(&ns, updated, false)?;
            }
        }
        Ok(())
    }

    fn next_pod_name(&self, state: &mut SimState, workload: &Workload) -> String {
        loop {
            state.next_suffix += 1;
            let name = format!("{}-{:05}", workload.name(), state.next_suffix);
            if self.cluster.pod_store().get_now(workload.namespace(), &name).is_err() {
                return name;
            }
        }
    }

    fn place(&self, nodes: &BTreeMap<String, Node>, state: &mut SimState, report: &mut SimReport) -> ClusterResult<()> {
        let pods = self.cluster.pod_store();
        let all = pods.list_now("", &ListParams::default());

        let mut load: HashMap<&str, u32> = nodes.keys().map(|n| (n.as_str(), 0)).collect();
        for pod in &all {
            if let Some(count) = pod.node_name().and_then(|n| load.get_mut(n)) {
                *count += 1;
            }
        }

        for pod in all.iter().filter(|p| p.node_name().is_none() && !p.is_terminating()) {
            let target = nodes
                .values()
                .filter(|node| node.is_schedulable())
                .filter(|node| Selector::from_map(&pod.spec.node_selector).matches(node.labels()))
                .filter(|node| load.get(node.name()).copied().unwrap_or(0) < node.status.max_pods)
                .min_by_key(|node| (load.get(node.name()).copied().unwrap_or(0), node.name().to_string()));

            let Some(node) = target else {
                continue;
            };
            let mut bound = pod.clone();
            bound.spec.node_name = Some(node.name().to_string());
            pods.update_now(pod.namespace(), bound, false)?;
            if let Some(count) = load.get_mut(node.name()) {
                *count += 1;
            }
            state
                .waiting
                .insert((pod.namespace().to_string(), pod.name().to_string()), 0);
            report.bound += 1;
        }
        Ok(())
    }

    fn run_kubelet(&self, nodes: &BTreeMap<String, Node>, state: &mut SimState, report: &mut SimReport) -> ClusterResult<()> {
        let pods = self.cluster.pod_store();
        for pod in pods.list_now("", &ListParams::default()) {
            let Some(node) = pod.node_name().and_then(|n| nodes.get(n)) else {
                continue;
            };
            if pod.is_terminating() {
                continue;
            }

            match pod.status.phase {
                PodPhase::Pending if node.status.ready => {
                    let key = (pod.namespace().to_string(), pod.name().to_string());
                    let waited = state.waiting.entry(key.clone()).or_insert(0);
                    if *waited >= self.settings.startup_ticks {
                        let mut started = pod.clone();
                        started.status.phase = PodPhase::Running;
                        started.status.ready = true;
                        pods.update_now(pod.namespace(), started, false)?;
                        state.waiting.remove(&key);
                        report.started += 1;
                    } else {
                        *waited += 1;
                    }
                }
                PodPhase::Running if pod.status.ready != node.status.ready => {
                    let mut flipped = pod.clone();
                    flipped.status.ready = node.status.ready;
                    pods.update_now(pod.namespace(), flipped, false)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetshift_core::labels;

    fn settings(startup_ticks: u32) -> SimSettings {
        SimSettings {
            tick: Duration::from_millis(5),
            startup_ticks,
        }
    }

    fn seeded(nodes: &[(&str, &str, u32)]) -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for (name, version, max) in nodes {
            let node = Node::new(name, labels([("web_version", *version)])).with_max_pods(*max);
            cluster.node_store().create_now("", node).unwrap();
        }
        cluster
    }

    fn web(name: &str, version: &str, replicas: u32) -> Workload {
        Workload::new("prod", name, replicas, labels([("app", name)]))
            .with_node_selector("web_version", version)
    }

    #[test]
    fn replicates_places_and_starts() {
        let cluster = seeded(&[("node-a", "v1", 2), ("node-b", "v1", 2)]);
        cluster.workload_store().create_now("prod", web("web-v1", "v1", 4)).unwrap();
        let sim = ClusterSim::new(cluster.clone(), settings(0));

        let report = sim.reconcile_once().unwrap();
        assert_eq!(report.created, 4);
        assert_eq!(report.bound, 4);
        assert_eq!(report.started, 4);

        let pods = cluster.pod_store().list_now("prod", &ListParams::default());
        assert!(pods.iter().all(Pod::is_running_and_ready));
        let on_a = pods.iter().filter(|p| p.node_name() == Some("node-a")).count();
        assert_eq!(on_a, 2);

        // Status catches up with readiness on the following pass.
        assert!(sim.reconcile_once().unwrap().is_idle());
        let wl = cluster.workload_store().get_now("prod", "web-v1").unwrap();
        assert_eq!(wl.status.replicas, 4);
        assert_eq!(wl.status.ready_replicas, 4);
    }

    #[test]
    fn startup_takes_ticks() {
        let cluster = seeded(&[("node-a", "v1", 4)]);
        cluster.workload_store().create_now("prod", web("web-v1", "v1", 1)).unwrap();
        let sim = ClusterSim::new(cluster.clone(), settings(2));

        let mut started = 0;
        for _ in 0..3 {
            started += sim.reconcile_once().unwrap().started;
        }
        assert_eq!(started, 1);
    }

    #[test]
    fn pods_stay_pending_without_matching_node() {
        let cluster = seeded(&[("node-a", "v1", 4)]);
        cluster.workload_store().create_now("prod", web("web-v2", "v2", 2)).unwrap();
        let sim = ClusterSim::new(cluster.clone(), settings(0));
        sim.reconcile_once().unwrap();

        let pods = cluster.pod_store().list_now("prod", &ListParams::default());
        assert_eq!(pods.len(), 2);
        assert!(pods.iter().all(|p| p.node_name().is_none()));
    }

    #[test]
    fn scale_down_removes_unbound_first() {
        let cluster = seeded(&[("node-a", "v1", 1)]);
        cluster.workload_store().create_now("prod", web("web-v1", "v1", 2)).unwrap();
        let sim = ClusterSim::new(cluster.clone(), settings(0));
        sim.reconcile_once().unwrap();

        let mut wl = cluster.workload_store().get_now("prod", "web-v1").unwrap();
        wl.spec.replicas = 1;
        cluster.workload_store().update_now("prod", wl, false).unwrap();
        let report = sim.reconcile_once().unwrap();
        assert_eq!(report.deleted, 1);

        let pods = cluster.pod_store().list_now("prod", &ListParams::default());
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].node_name(), Some("node-a"));
    }

    #[test]
    fn terminating_pods_are_collected_and_replaced() {
        let cluster = seeded(&[("node-a", "v1", 4)]);
        cluster.workload_store().create_now("prod", web("web-v1", "v1", 1)).unwrap();
        let sim = ClusterSim::new(cluster.clone(), settings(0));
        sim.reconcile_once().unwrap();

        let pod = cluster.pod_store().list_now("prod", &ListParams::default()).remove(0);
        cluster.pod_store().delete_now("prod", pod.name(), Some(30)).unwrap();
        let report = sim.reconcile_once().unwrap();
        assert_eq!(report.collected, 1);
        assert_eq!(report.created, 1);
    }

    #[test]
    fn unready_node_drops_pod_readiness() {
        let cluster = seeded(&[("node-a", "v1", 4)]);
        cluster.workload_store().create_now("prod", web("web-v1", "v1", 1)).unwrap();
        let sim = ClusterSim::new(cluster.clone(), settings(0));
        sim.reconcile_once().unwrap();

        let mut node = cluster.node_store().get_now("", "node-a").unwrap();
        node.status.ready = false;
        cluster.node_store().update_now("", node, false).unwrap();
        sim.reconcile_once().unwrap();

        let pod = cluster.pod_store().list_now("prod", &ListParams::default()).remove(0);
        assert!(!pod.is_running_and_ready());
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_shutdown() {
        let cluster = seeded(&[("node-a", "v1", 4)]);
        cluster.workload_store().create_now("prod", web("web-v1", "v1", 2)).unwrap();
        let sim = Arc::new(ClusterSim::new(cluster.clone(), settings(0)));
        let (tx, rx) = watch::channel(false);
        let handle = sim.spawn(rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let pods = cluster.pod_store().list_now("prod", &ListParams::default());
        assert_eq!(pods.len(), 2);
    }
}
