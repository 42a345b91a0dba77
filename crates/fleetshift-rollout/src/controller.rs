//! Rollout controller — drives the rollout state machine.
//!
//! ```text
//! Validating ─► CreatingNewWorkload ─► ProcessingUnits(1..=N) ─► Finalizing ─► Done
//!      └──────────────┴──────────────────────┴──────────────────────┴──► Failed
//! ```
//!
//! For a node-grouped rollout every unit runs, strictly one after another:
//! allocate, quarantine, drain, scale old down, promote, scale new up,
//! converge. A unit never starts before the previous one has converged.
//! Nothing is rolled back on failure; every phase is idempotent, so the
//! same request can simply be run again.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetshift_cluster::Cluster;
use fleetshift_core::{parse_workload, ListParams, Object, Workload, DEFAULT_NAMESPACE};

use crate::context::PhaseContext;
use crate::converge::{converge_unit, converge_workload};
use crate::drain::drain_unit;
use crate::error::{RolloutError, RolloutResult};
use crate::fleet;
use crate::ledger::ReplicaLedger;
use crate::relabel::relabel_unit;
use crate::strategy::{ByNodeConfig, RolloutConfig, RolloutStrategy};
use crate::units::{enumerate_units, quarantine_value, CapacityUnit};
use crate::update::scale_workload;

/// Where a rollout currently is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RolloutState {
    /// Checking the old workload and the new manifest.
    Validating,
    /// Creating (or adopting) the new workload.
    CreatingNewWorkload,
    /// Processing unit `current` of `total` (1-based). Units are nodes for
    /// node-grouped rollouts and old pods for fleet-wide ones.
    ProcessingUnits { current: u32, total: u32 },
    /// Topping up the new workload and retiring the old one.
    Finalizing,
    /// Completed successfully.
    Done,
    /// Aborted; the cluster is left as the last completed phase left it.
    Failed { reason: String },
}

impl RolloutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutState::Done | RolloutState::Failed { .. })
    }
}

/// Snapshot published on the progress channel after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub state: RolloutState,
    /// Node (or pod, fleet-wide) being processed.
    pub unit: Option<String>,
    /// Node-grouped rollouts only.
    pub ledger: Option<ReplicaLedger>,
}

impl Default for RolloutProgress {
    fn default() -> Self {
        Self {
            state: RolloutState::Validating,
            unit: None,
            ledger: None,
        }
    }
}

/// What to roll out, and how.
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub namespace: String,
    /// Name of the workload being replaced.
    pub old_name: String,
    /// Manifest of the replacement workload.
    pub manifest: String,
    pub strategy: RolloutStrategy,
    pub config: RolloutConfig,
}

/// Outcome of a successful rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutSummary {
    pub old_workload: String,
    pub new_workload: String,
    pub strategy: String,
    /// Nodes migrated, in processing order (node-grouped only).
    pub units: Vec<String>,
    /// Old pods deleted by drains or swaps.
    pub pods_replaced: u32,
    /// Final replica count of the new workload.
    pub replicas: u32,
    /// Replicas added after the last unit to reach the target.
    pub final_correction: u32,
    /// Leftover old pods removed after the old workload was deleted.
    pub swept: u32,
}

/// One rollout. Consumed by [`Rollout::run`].
pub struct Rollout<'a> {
    cluster: &'a dyn Cluster,
    request: RolloutRequest,
    progress: watch::Sender<RolloutProgress>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> Rollout<'a> {
    /// An empty namespace in `request` means [`DEFAULT_NAMESPACE`].
    pub fn new(cluster: &'a dyn Cluster, mut request: RolloutRequest) -> Self {
        if request.namespace.is_empty() {
            request.namespace = DEFAULT_NAMESPACE.to_string();
        }
        let (progress, _) = watch::channel(RolloutProgress::default());
        Self {
            cluster,
            request,
            progress,
            cancel: None,
        }
    }

    /// Publish progress on an existing channel.
    pub fn with_progress(mut self, progress: watch::Sender<RolloutProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Abort at the next phase boundary or wait once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn progress(&self) -> watch::Receiver<RolloutProgress> {
        self.progress.subscribe()
    }

    pub fn request(&self) -> &RolloutRequest {
        &self.request
    }

    /// Run to completion.
    pub async fn run(self) -> RolloutResult<RolloutSummary> {
        let ctx = PhaseContext::new(self.cluster, &self.request.namespace, self.request.config.clone())
            .with_cancel(self.cancel.clone());
        info!(
            workload = %self.request.old_name,
            namespace = %self.request.namespace,
            strategy = self.request.strategy.name(),
            "starting rollout"
        );

        let result = match &self.request.strategy {
            RolloutStrategy::FleetWide => fleet::run_fleet_wide(&self, &ctx).await,
            RolloutStrategy::ByNode(cfg) => self.run_by_node(&ctx, cfg).await,
        };

        match &result {
            Ok(summary) => {
                self.publish(RolloutState::Done, None, None);
                info!(
                    workload = %summary.old_workload,
                    new_workload = %summary.new_workload,
                    replicas = summary.replicas,
                    "rollout completed"
                );
            }
            Err(e) => {
                let last = self.progress.borrow().clone();
                self.publish(
                    RolloutState::Failed {
                        reason: e.to_string(),
                    },
                    last.unit,
                    last.ledger,
                );
                warn!(workload = %self.request.old_name, error = %e, "rollout failed");
            }
        }
        result
    }

    async fn run_by_node(
        &self,
        ctx: &PhaseContext<'_>,
        cfg: &ByNodeConfig,
    ) -> RolloutResult<RolloutSummary> {
        self.publish(RolloutState::Validating, None, None);
        let (old, new) = self.validate(ctx).await?;
        let label = cfg.partition_label.as_str();
        let old_value = partition_value(&old, label)?;
        let new_value = partition_value(&new, label)?;
        if old_value == new_value {
            return Err(RolloutError::BadFormat(format!(
                "new workload {} selects the same {label}={new_value} nodes as {}",
                new.name(),
                old.name()
            )));
        }
        let quarantine = quarantine_value(cfg.quarantine_value.as_deref(), &old_value, &new_value)?;
        let target = new.spec.replicas;

        // Nothing is written until a unit exists or an earlier run already
        // granted capacity to the new workload.
        let old_selector = old.pod_selector();
        let units = enumerate_units(ctx, label, &[old_value.as_str(), quarantine.as_str()], &old_selector).await?;
        let granted = self
            .find_new_workload(ctx, &new)
            .await?
            .map_or(0, |existing| existing.spec.replicas.min(target));
        if units.is_empty() && granted == 0 {
            return Err(RolloutError::NoEligibleCapacityUnit {
                label: label.to_string(),
                value: old_value,
            });
        }

        self.publish(RolloutState::CreatingNewWorkload, None, None);
        let (new, adopted) = self.ensure_new_workload(ctx, new, 0).await?;
        let mut ledger = if adopted {
            ReplicaLedger::resume(old.spec.replicas, new.spec.replicas, target)
        } else {
            ReplicaLedger::new(old.spec.replicas, target)
        };
        let new_selector = new.pod_selector();
        info!(
            workload = %old.name(),
            new_workload = %new.name(),
            units = units.len(),
            %quarantine,
            original_total = ledger.original_total(),
            target,
            "migrating nodes"
        );

        let total = units.len() as u32;
        let mut pods_replaced = 0;
        for (i, unit) in units.iter().enumerate() {
            let allocated = ledger.allocate(unit.old_pods);
            self.publish(
                RolloutState::ProcessingUnits {
                    current: i as u32 + 1,
                    total,
                },
                Some(unit.node.clone()),
                Some(ledger),
            );
            info!(unit = %unit.node, old_pods = unit.old_pods, allocated, "processing node");

            relabel_unit(ctx, &unit.node, label, &quarantine).await?;
            pods_replaced += drain_unit(ctx, &old_selector, &unit.node).await?;
            scale_workload(ctx, old.name(), ledger.old_remaining()).await?;
            relabel_unit(ctx, &unit.node, label, &new_value).await?;
            scale_workload(ctx, new.name(), ledger.new_allocated()).await?;
            converge_unit(ctx, &new_selector, &unit.node, allocated).await?;

            debug_assert!(ledger.is_balanced());
            debug!(
                unit = %unit.node,
                old_remaining = ledger.old_remaining(),
                new_allocated = ledger.new_allocated(),
                "node done"
            );
        }

        self.publish(RolloutState::Finalizing, None, Some(ledger));
        let final_correction = ledger.apply_correction();
        if final_correction > 0 {
            info!(workload = %new.name(), final_correction, "topping up new workload");
            scale_workload(ctx, new.name(), ledger.new_allocated()).await?;
            converge_workload(ctx, &new_selector, ledger.new_allocated()).await?;
        }
        let swept = self.retire_old(ctx, &old).await?;

        Ok(RolloutSummary {
            old_workload: old.name().to_string(),
            new_workload: new.name().to_string(),
            strategy: self.request.strategy.name().to_string(),
            units: units.into_iter().map(|u: CapacityUnit| u.node).collect(),
            pods_replaced,
            replicas: ledger.new_allocated(),
            final_correction,
            swept,
        })
    }

    // ── Steps shared by both strategies ───────────────────────────

    pub(crate) fn publish(
        &self,
        state: RolloutState,
        unit: Option<String>,
        ledger: Option<ReplicaLedger>,
    ) {
        debug!(workload = %self.request.old_name, ?state, "rollout transition");
        self.progress.send_replace(RolloutProgress { state, unit, ledger });
    }

    /// Decode the manifest and fetch the old workload.
    ///
    /// The manifest is checked first, so a malformed request never
    /// touches the cluster beyond this read.
    pub(crate) async fn validate(&self, ctx: &PhaseContext<'_>) -> RolloutResult<(Workload, Workload)> {
        ctx.ensure_active()?;
        let mut new = parse_workload(&self.request.manifest)?;
        let old = ctx
            .cluster
            .workloads()
            .get(&ctx.namespace, &self.request.old_name)
            .await?;

        new.metadata.namespace = old.namespace().to_string();
        if new.name() == old.name() {
            return Err(RolloutError::BadFormat(format!(
                "new workload must not reuse the name {}",
                old.name()
            )));
        }
        let overlaps = new.pod_selector().matches(&old.spec.template.metadata.labels)
            || old.pod_selector().matches(&new.spec.template.metadata.labels);
        if overlaps {
            return Err(RolloutError::BadFormat(format!(
                "selector of {} overlaps with the pods of {}",
                new.name(),
                old.name()
            )));
        }
        debug!(workload = %old.name(), new_workload = %new.name(), "rollout validated");
        Ok((old, new))
    }

    /// Create the new workload with `replicas`, or adopt it when a previous
    /// run already created it. Returns the workload and whether it was adopted.
    pub(crate) async fn ensure_new_workload(
        &self,
        ctx: &PhaseContext<'_>,
        new: Workload,
        replicas: u32,
    ) -> RolloutResult<(Workload, bool)> {
        ctx.ensure_active()?;
        if let Some(existing) = self.find_new_workload(ctx, &new).await? {
            info!(
                workload = %existing.name(),
                replicas = existing.spec.replicas,
                "adopting existing new workload"
            );
            return Ok((existing, true));
        }
        let mut fresh = new;
        fresh.spec.replicas = replicas;
        fresh.status = Default::default();
        fresh.metadata.resource_version = 0;
        let created = ctx.cluster.workloads().create(&ctx.namespace, fresh).await?;
        info!(workload = %created.name(), replicas, "created new workload");
        Ok((created, false))
    }

    /// The new workload as a previous run left it, if it exists.
    ///
    /// An existing workload with a different selector is a `Conflict`.
    pub(crate) async fn find_new_workload(
        &self,
        ctx: &PhaseContext<'_>,
        new: &Workload,
    ) -> RolloutResult<Option<Workload>> {
        match ctx.cluster.workloads().get(&ctx.namespace, new.name()).await {
            Ok(existing) if existing.spec.selector != new.spec.selector => {
                Err(RolloutError::Conflict(format!(
                    "workload {} already exists with a different selector",
                    existing.name()
                )))
            }
            Ok(existing) => Ok(Some(existing)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the old workload, then every pod its selector still matches.
    /// Returns how many leftover pods were swept.
    pub(crate) async fn retire_old(&self, ctx: &PhaseContext<'_>, old: &Workload) -> RolloutResult<u32> {
        ctx.ensure_active()?;
        let pods = ctx.cluster.pods();
        match ctx.cluster.workloads().delete(&ctx.namespace, old.name(), None).await {
            Ok(()) => info!(workload = %old.name(), "deleted old workload"),
            Err(e) if e.is_not_found() => debug!(workload = %old.name(), "old workload already gone"),
            Err(e) => return Err(e.into()),
        }

        let leftovers = pods
            .list(&ctx.namespace, &ListParams::labels(old.pod_selector()))
            .await?;
        let mut swept = 0;
        for pod in &leftovers {
            match pods
                .delete(&ctx.namespace, pod.name(), Some(ctx.config.grace_period_secs))
                .await
            {
                Ok(()) => swept += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        if swept > 0 {
            info!(workload = %old.name(), swept, "swept leftover old pods");
        }
        Ok(swept)
    }
}

/// The value `workload`'s pod template requires for the partition label.
fn partition_value(workload: &Workload, label: &str) -> RolloutResult<String> {
    workload
        .partition_value(label)
        .map(str::to_string)
        .ok_or_else(|| RolloutError::MissingPartitionLabel {
            workload: workload.name().to_string(),
            label: label.to_string(),
        })
}
