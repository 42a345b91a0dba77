//! Drain phase — remove old pods from one node and wait until they are gone.

use tracing::{debug, info};

use fleetshift_core::{ListParams, Object, Selector};

use crate::context::PhaseContext;
use crate::error::RolloutResult;
use crate::units::pod_names;

/// Delete every pod matching `selector` on `unit`, then wait up to the
/// deletion timeout until none is left. Returns how many were deleted.
///
/// An empty node returns at once without opening a watch. The first
/// failed delete aborts the drain.
pub async fn drain_unit(ctx: &PhaseContext<'_>, selector: &Selector, unit: &str) -> RolloutResult<u32> {
    ctx.ensure_active()?;
    let params = ListParams::labels(selector.clone()).on_node(unit);
    let pods = ctx.cluster.pods().list(&ctx.namespace, &params).await?;
    if pods.is_empty() {
        debug!(unit, "no old pods on node, nothing to drain");
        return Ok(0);
    }

    info!(unit, pods = ?pod_names(&pods), "draining node");
    for pod in &pods {
        match ctx
            .cluster
            .pods()
            .delete(&ctx.namespace, pod.name(), Some(ctx.config.grace_period_secs))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(unit, pod = %pod.name(), "pod already gone"),
            Err(e) => return Err(e.into()),
        }
    }

    let what = format!("old pods to leave node {unit}");
    ctx.pod_watcher(params)
        .wait_until(&what, ctx.config.deletion_timeout, |pods| pods.is_empty())
        .await?;
    info!(unit, drained = pods.len(), "node drained");
    Ok(pods.len() as u32)
}
