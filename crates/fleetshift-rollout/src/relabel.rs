//! Relabel phase — steer future placement on one node.
//!
//! Each node is relabelled twice: to the quarantine value before it is
//! drained, so the old workload cannot place replacements there, and to
//! the new workload's value once the drain is confirmed.

use tracing::info;

use fleetshift_core::Node;

use crate::context::PhaseContext;
use crate::error::RolloutResult;
use crate::update::read_modify_write;

/// Set the partition label on `unit` to `value`. A no-op when it already is.
pub async fn relabel_unit(
    ctx: &PhaseContext<'_>,
    unit: &str,
    key: &str,
    value: &str,
) -> RolloutResult<Node> {
    ctx.ensure_active()?;
    let mut previous = None;
    let node = read_modify_write(ctx, ctx.cluster.nodes(), "", unit, |node: &mut Node| {
        previous = node.label(key).map(str::to_string);
        if previous.as_deref() == Some(value) {
            return false;
        }
        node.metadata
            .labels
            .insert(key.to_string(), value.to_string());
        true
    })
    .await?;
    info!(
        unit,
        label = key,
        from = previous.as_deref().unwrap_or("<none>"),
        to = value,
        "relabelled node"
    );
    Ok(node)
}
