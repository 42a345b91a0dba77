//! Fleet-wide rollout — swap old pods for new ones, one pod at a time.
//!
//! No node labels are touched. The new workload is created at its full
//! size, then each old pod in turn is deleted, its removal is awaited,
//! and a freshly ready new pod is awaited on the node it vacated. At most
//! one pod's worth of capacity is missing at any moment.

use std::collections::HashSet;

use tracing::{debug, info};

use fleetshift_core::{ListParams, Object, Pod, Selector, Workload, FIELD_NAME};

use crate::context::PhaseContext;
use crate::controller::{Rollout, RolloutState, RolloutSummary};
use crate::converge::{converge_workload, ready_count};
use crate::error::RolloutResult;
use crate::update::scale_workload;

pub(crate) async fn run_fleet_wide(
    rollout: &Rollout<'_>,
    ctx: &PhaseContext<'_>,
) -> RolloutResult<RolloutSummary> {
    rollout.publish(RolloutState::Validating, None, None);
    let (old, new) = rollout.validate(ctx).await?;
    let target = new.spec.replicas;

    rollout.publish(RolloutState::CreatingNewWorkload, None, None);
    let (new, _) = rollout.ensure_new_workload(ctx, new, target).await?;
    scale_workload(ctx, new.name(), target).await?;

    let old_selector = old.pod_selector();
    let new_selector = new.pod_selector();
    let mut old_pods: Vec<Pod> = ctx
        .cluster
        .pods()
        .list(&ctx.namespace, &ListParams::labels(old_selector.clone()))
        .await?
        .into_iter()
        .filter(|p| !p.is_terminating())
        .collect();
    old_pods.sort_by(|a, b| a.name().cmp(b.name()));
    info!(
        workload = %old.name(),
        new_workload = %new.name(),
        pods = old_pods.len(),
        target,
        "swapping pods"
    );

    let total = old_pods.len() as u32;
    let mut old_replicas = old.spec.replicas;
    let mut pods_replaced = 0;
    for (i, pod) in old_pods.iter().enumerate() {
        rollout.publish(
            RolloutState::ProcessingUnits {
                current: i as u32 + 1,
                total,
            },
            Some(pod.name().to_string()),
            None,
        );
        if swap_pod(ctx, &old, &new_selector, target, pod, &mut old_replicas).await? {
            pods_replaced += 1;
        }
    }

    rollout.publish(RolloutState::Finalizing, None, None);
    scale_workload(ctx, old.name(), 0).await?;
    converge_workload(ctx, &new_selector, target).await?;
    let swept = rollout.retire_old(ctx, &old).await?;

    Ok(RolloutSummary {
        old_workload: old.name().to_string(),
        new_workload: new.name().to_string(),
        strategy: rollout.request().strategy.name().to_string(),
        units: Vec::new(),
        pods_replaced,
        replicas: target,
        final_correction: 0,
        swept,
    })
}

/// Replace one old pod. Returns `false` when the pod was already gone.
///
/// The old workload shrinks by one alongside the delete so its
/// controller does not race the new pods for the freed slot.
async fn swap_pod(
    ctx: &PhaseContext<'_>,
    old: &Workload,
    new_selector: &Selector,
    target: u32,
    pod: &Pod,
    old_replicas: &mut u32,
) -> RolloutResult<bool> {
    ctx.ensure_active()?;
    let pods = ctx.cluster.pods();
    let node = pod.node_name().map(str::to_string);
    let landing = match &node {
        Some(node) => ListParams::labels(new_selector.clone()).on_node(node),
        None => ListParams::labels(new_selector.clone()),
    };

    let present: HashSet<String> = pods
        .list(&ctx.namespace, &landing)
        .await?
        .into_iter()
        .map(|p| p.metadata.name)
        .collect();
    let fleet_ready = ready_count(
        &pods
            .list(&ctx.namespace, &ListParams::labels(new_selector.clone()))
            .await?,
    ) >= target;

    match pods
        .delete(&ctx.namespace, pod.name(), Some(ctx.config.grace_period_secs))
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            debug!(pod = %pod.name(), "old pod already gone");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    }
    *old_replicas = old_replicas.saturating_sub(1);
    scale_workload(ctx, old.name(), *old_replicas).await?;

    let gone = ListParams::labels(old.pod_selector())
        .with_fields(Selector::everything().eq(FIELD_NAME, pod.name()));
    ctx.pod_watcher(gone)
        .wait_until(
            &format!("old pod {} to terminate", pod.name()),
            ctx.config.deletion_timeout,
            |pods| pods.is_empty(),
        )
        .await?;

    if fleet_ready {
        debug!(pod = %pod.name(), "new workload already fully ready, not waiting for a replacement");
        return Ok(true);
    }
    let place = node.as_deref().unwrap_or("any node");
    ctx.pod_watcher(landing)
        .wait_until(
            &format!("a new pod ready on {place}"),
            ctx.config.creation_timeout,
            |pods| {
                pods.iter()
                    .any(|p| p.is_running_and_ready() && !present.contains(p.name()))
            },
        )
        .await?;
    info!(pod = %pod.name(), node = place, "pod replaced");
    Ok(true)
}
