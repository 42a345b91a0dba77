//! Converge phase — wait until new pods are running and ready.
//!
//! This is the gate between nodes: a node is not done until the capacity
//! granted to the new workload there is demonstrably serving.

use tracing::{debug, info};

use fleetshift_core::{ListParams, Pod, Selector};

use crate::context::PhaseContext;
use crate::error::RolloutResult;

/// Pods that are running and ready.
pub fn ready_count(pods: &[Pod]) -> u32 {
    pods.iter().filter(|p| p.is_running_and_ready()).count() as u32
}

/// Wait up to the creation timeout for `expected` ready pods matching
/// `selector` on `unit`. Zero returns at once without opening a watch.
pub async fn converge_unit(
    ctx: &PhaseContext<'_>,
    selector: &Selector,
    unit: &str,
    expected: u32,
) -> RolloutResult<()> {
    if expected == 0 {
        debug!(unit, "nothing allocated to node, converge skipped");
        return Ok(());
    }
    ctx.ensure_active()?;
    let what = format!("{expected} new pods ready on node {unit}");
    ctx.pod_watcher(ListParams::labels(selector.clone()).on_node(unit))
        .wait_until(&what, ctx.config.creation_timeout, |pods| {
            ready_count(pods) >= expected
        })
        .await?;
    info!(unit, ready = expected, "node converged");
    Ok(())
}

/// Wait up to the creation timeout for `expected` ready pods matching
/// `selector` anywhere in the namespace.
pub async fn converge_workload(
    ctx: &PhaseContext<'_>,
    selector: &Selector,
    expected: u32,
) -> RolloutResult<()> {
    if expected == 0 {
        return Ok(());
    }
    ctx.ensure_active()?;
    let what = format!("{expected} ready pods matching {selector}");
    ctx.pod_watcher(ListParams::labels(selector.clone()))
        .wait_until(&what, ctx.config.creation_timeout, |pods| {
            ready_count(pods) >= expected
        })
        .await?;
    info!(%selector, ready = expected, "workload converged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fleetshift_cluster::MemoryCluster;
    use fleetshift_core::{labels, PodPhase, PodTemplate, TemplateMeta};

    use crate::error::RolloutError;
    use crate::strategy::RolloutConfig;

    fn new_selector() -> Selector {
        Selector::from_map(&labels([("app", "web"), ("version", "v2")]))
    }

    fn new_pod(name: &str, node: &str, ready: bool) -> Pod {
        let template = PodTemplate {
            metadata: TemplateMeta {
                labels: labels([("app", "web"), ("version", "v2")]),
            },
            ..Default::default()
        };
        let mut pod = Pod::from_template("prod", name, &template);
        pod.spec.node_name = Some(node.to_string());
        if ready {
            pod.status.phase = PodPhase::Running;
            pod.status.ready = true;
        }
        pod
    }

    fn fast() -> RolloutConfig {
        RolloutConfig {
            poll_interval: Duration::from_millis(10),
            creation_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    #[test]
    fn counts_only_running_ready_pods() {
        let mut running_unready = new_pod("c", "node-a", false);
        running_unready.status.phase = PodPhase::Running;
        let pods = vec![
            new_pod("a", "node-a", true),
            new_pod("b", "node-a", false),
            running_unready,
        ];
        assert_eq!(ready_count(&pods), 1);
    }

    #[tokio::test]
    async fn waits_for_pods_to_become_ready() {
        let cluster = MemoryCluster::new();
        let store = cluster.pod_store().clone();
        store.create_now("prod", new_pod("web-v2-1", "node-a", false)).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let mut pod = store.get_now("prod", "web-v2-1").unwrap();
            pod.status.phase = PodPhase::Running;
            pod.status.ready = true;
            store.update_now("prod", pod, false).unwrap();
        });

        let ctx = PhaseContext::new(&cluster, "prod", fast());
        converge_unit(&ctx, &new_selector(), "node-a", 1).await.unwrap();
    }

    #[tokio::test]
    async fn ready_pods_elsewhere_do_not_count() {
        let cluster = MemoryCluster::new();
        cluster
            .pod_store()
            .create_now("prod", new_pod("web-v2-1", "node-b", true))
            .unwrap();
        let ctx = PhaseContext::new(&cluster, "prod", fast());

        let err = converge_unit(&ctx, &new_selector(), "node-a", 1).await.unwrap_err();
        assert!(matches!(err, RolloutError::TimedOut { .. }));
        converge_workload(&ctx, &new_selector(), 1).await.unwrap();
    }

    #[tokio::test]
    async fn zero_expected_opens_no_watch() {
        let cluster = MemoryCluster::new();
        cluster.faults().fail_next_watches(10);
        let ctx = PhaseContext::new(&cluster, "prod", fast());
        converge_unit(&ctx, &new_selector(), "node-a", 0).await.unwrap();
    }
}
