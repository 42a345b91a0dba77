//! Build the simulated cluster described by `fleet.toml`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use fleetshift_cluster::{ClusterSim, MemoryCluster, SimSettings};
use fleetshift_core::{FleetConfig, Object};

/// Upper bound on reconcile passes while settling the seeded cluster.
const SETTLE_PASSES: usize = 64;

pub struct SeededCluster {
    pub config: FleetConfig,
    pub cluster: MemoryCluster,
    pub sim: Arc<ClusterSim>,
}

/// Load the config, create its nodes and workloads, and run the
/// simulator until the seed has settled.
pub fn load(config_path: &Path) -> anyhow::Result<SeededCluster> {
    let config = FleetConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    seed(config, base_dir)
}

pub fn seed(config: FleetConfig, base_dir: &Path) -> anyhow::Result<SeededCluster> {
    let cluster = MemoryCluster::new();

    for node in config.seed_nodes() {
        let name = node.name().to_string();
        cluster
            .node_store()
            .create_now("", node)
            .with_context(|| format!("seeding node {name}"))?;
    }
    let workloads = config.seed_workloads(base_dir)?;
    for workload in workloads {
        let namespace = workload.namespace().to_string();
        let name = workload.name().to_string();
        cluster
            .workload_store()
            .create_now(&namespace, workload)
            .with_context(|| format!("seeding workload {namespace}/{name}"))?;
    }

    let sim = Arc::new(ClusterSim::new(
        cluster.clone(),
        SimSettings::from(&config.simulator),
    ));
    let mut settled = false;
    for _ in 0..SETTLE_PASSES {
        if sim.reconcile_once()?.is_idle() {
            settled = true;
            break;
        }
    }
    if !settled {
        warn!("seeded cluster has not settled; continuing");
    }
    info!(
        nodes = config.seed.nodes.len(),
        workloads = config.seed.workloads.len(),
        "cluster seeded"
    );

    Ok(SeededCluster {
        config,
        cluster,
        sim,
    })
}
