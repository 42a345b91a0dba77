//! `fleetd rollout`: one rollout against the seeded cluster.
//!
//! Progress goes to the log; the final report (summary, workloads and
//! node labels) is printed to stdout as JSON.

use std::path::Path;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use fleetshift_core::{ListParams, Node, Workload};
use fleetshift_rollout::{
    ByNodeConfig, Rollout, RolloutConfig, RolloutRequest, RolloutStrategy, RolloutSummary,
};

use crate::{join_task, seed};

#[derive(serde::Serialize)]
struct Report {
    summary: RolloutSummary,
    workloads: Vec<Workload>,
    nodes: Vec<Node>,
}

pub async fn run(
    config_path: &Path,
    namespace: &str,
    old: &str,
    manifest_path: &Path,
    node_label: Option<String>,
) -> anyhow::Result<()> {
    let seeded = seed::load(config_path)?;
    let manifest = std::fs::read_to_string(manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;

    let strategy = match node_label {
        Some(label) => RolloutStrategy::ByNode(ByNodeConfig {
            partition_label: label,
            quarantine_value: seeded.config.rollout.quarantine_value.clone(),
        }),
        None => RolloutStrategy::FleetWide,
    };
    let request = RolloutRequest {
        namespace: namespace.to_string(),
        old_name: old.to_string(),
        manifest,
        strategy,
        config: RolloutConfig::from(&seeded.config.rollout),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sim_handle = seeded.sim.clone().spawn(shutdown_rx);

    let rollout = Rollout::new(&seeded.cluster, request);
    let mut progress = rollout.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            info!(
                state = ?snapshot.state,
                unit = snapshot.unit.as_deref().unwrap_or("-"),
                "rollout progress"
            );
            if snapshot.state.is_terminal() {
                break;
            }
        }
    });

    let outcome = rollout.run().await;
    join_task(reporter, "progress reporter").await;
    let _ = shutdown_tx.send(true);
    join_task(sim_handle, "cluster simulator").await;
    let summary = outcome.context("rollout failed")?;

    let report = Report {
        summary,
        workloads: seeded
            .cluster
            .workload_store()
            .list_now(namespace, &ListParams::default()),
        nodes: seeded
            .cluster
            .node_store()
            .list_now("", &ListParams::default()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
