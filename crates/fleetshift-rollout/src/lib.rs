//! fleetshift rollout engine — replace a running workload without downtime.
//!
//! Two strategies share the same primitives:
//!
//! - **node-grouped** ([`rolling_update_by_node`]): nodes are migrated one
//!   at a time. Each node is quarantined, drained of old pods, relabelled
//!   for the new workload, and must serve its share of new pods before
//!   the next node starts. A [`ReplicaLedger`] moves replica capacity from
//!   the old workload to the new one as nodes complete.
//! - **fleet-wide** ([`rolling_update`]): the new workload is created at
//!   full size and old pods are replaced one at a time.
//!
//! # Components
//!
//! - **`watcher`** — wait for a condition over live objects (watch + re-list)
//! - **`units`** — eligible nodes and per-node pod counts
//! - **`drain`** / **`relabel`** / **`converge`** — per-node phases
//! - **`ledger`** — replica accounting between old and new workloads
//! - **`controller`** — the rollout state machine
//! - **`strategy`** — strategy and timing configuration

pub mod context;
pub mod controller;
pub mod converge;
pub mod drain;
pub mod error;
mod fleet;
pub mod ledger;
pub mod relabel;
pub mod strategy;
pub mod units;
pub mod update;
pub mod watcher;

pub use context::PhaseContext;
pub use controller::{Rollout, RolloutProgress, RolloutRequest, RolloutState, RolloutSummary};
pub use error::{RolloutError, RolloutResult};
pub use ledger::ReplicaLedger;
pub use strategy::{ByNodeConfig, RolloutConfig, RolloutStrategy};
pub use units::CapacityUnit;
pub use watcher::ConvergenceWatcher;

use fleetshift_cluster::Cluster;

/// Replace `old_name` with the workload in `manifest`, one pod at a time.
pub async fn rolling_update(
    cluster: &dyn Cluster,
    old_name: &str,
    manifest: &str,
    namespace: &str,
) -> RolloutResult<RolloutSummary> {
    let request = RolloutRequest {
        namespace: namespace.to_string(),
        old_name: old_name.to_string(),
        manifest: manifest.to_string(),
        strategy: RolloutStrategy::FleetWide,
        config: RolloutConfig::default(),
    };
    Rollout::new(cluster, request).run().await
}

/// Replace `old_name` with the workload in `manifest`, one node at a time.
///
/// Both pod templates must select nodes by `partition_label`; nodes move
/// from the old value to the new one as they are migrated.
pub async fn rolling_update_by_node(
    cluster: &dyn Cluster,
    old_name: &str,
    manifest: &str,
    namespace: &str,
    partition_label: &str,
    config: RolloutConfig,
) -> RolloutResult<RolloutSummary> {
    let request = RolloutRequest {
        namespace: namespace.to_string(),
        old_name: old_name.to_string(),
        manifest: manifest.to_string(),
        strategy: RolloutStrategy::by_node(partition_label),
        config,
    };
    Rollout::new(cluster, request).run().await
}
