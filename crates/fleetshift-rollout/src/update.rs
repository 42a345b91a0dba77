//! Optimistic read-modify-write against the cluster.

use tracing::{info, warn};

use fleetshift_cluster::ObjectApi;
use fleetshift_core::{Object, Workload};

use crate::context::PhaseContext;
use crate::error::RolloutResult;

/// Re-fetch `name`, apply `mutate`, and write it back.
///
/// `mutate` returns `false` when the object already has the desired
/// shape, in which case nothing is written. A `Conflict` from the write
/// restarts from the fetch, up to `conflict_retries` times. The whole loop
/// runs under the phase timeout.
pub async fn read_modify_write<K, F>(
    ctx: &PhaseContext<'_>,
    api: &dyn ObjectApi<K>,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> RolloutResult<K>
where
    K: Object,
    F: FnMut(&mut K) -> bool + Send,
{
    let what = format!("update of {} {name}", K::KIND);
    ctx.bounded(&what, async {
        let mut attempt = 0;
        loop {
            let mut obj = api.get(namespace, name).await?;
            if !mutate(&mut obj) {
                return Ok(obj);
            }
            match api.update(namespace, obj).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && attempt < ctx.config.conflict_retries => {
                    attempt += 1;
                    warn!(kind = K::KIND, name, attempt, error = %e, "update conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    })
    .await
}

/// Set a workload's desired replica count.
pub async fn scale_workload(
    ctx: &PhaseContext<'_>,
    name: &str,
    replicas: u32,
) -> RolloutResult<Workload> {
    let workload = read_modify_write(
        ctx,
        ctx.cluster.workloads(),
        &ctx.namespace,
        name,
        |wl: &mut Workload| {
            if wl.spec.replicas == replicas {
                return false;
            }
            wl.spec.replicas = replicas;
            true
        },
    )
    .await?;
    info!(workload = %name, replicas, "scaled workload");
    Ok(workload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetshift_cluster::MemoryCluster;
    use fleetshift_core::labels;

    use crate::error::RolloutError;
    use crate::strategy::RolloutConfig;

    fn cluster_with_web() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        cluster
            .workload_store()
            .create_now("prod", Workload::new("prod", "web-v1", 4, labels([("app", "web")])))
            .unwrap();
        cluster
    }

    #[tokio::test]
    async fn scale_retries_conflicts() {
        let cluster = cluster_with_web();
        cluster.faults().conflict_next_updates("Workload", 2);
        let ctx = PhaseContext::new(&cluster, "prod", RolloutConfig::default());

        let wl = scale_workload(&ctx, "web-v1", 2).await.unwrap();
        assert_eq!(wl.spec.replicas, 2);
    }

    #[tokio::test]
    async fn conflicts_beyond_retry_budget_surface() {
        let cluster = cluster_with_web();
        cluster.faults().conflict_next_updates("Workload", 3);
        let config = RolloutConfig {
            conflict_retries: 2,
            ..Default::default()
        };
        let ctx = PhaseContext::new(&cluster, "prod", config);

        let err = scale_workload(&ctx, "web-v1", 2).await.unwrap_err();
        assert!(matches!(err, RolloutError::Conflict(_)));
        let wl = cluster.workload_store().get_now("prod", "web-v1").unwrap();
        assert_eq!(wl.spec.replicas, 4);
    }

    #[tokio::test]
    async fn unchanged_object_is_not_written() {
        let cluster = cluster_with_web();
        let before = cluster.workload_store().get_now("prod", "web-v1").unwrap();
        let ctx = PhaseContext::new(&cluster, "prod", RolloutConfig::default());

        scale_workload(&ctx, "web-v1", 4).await.unwrap();
        let after = cluster.workload_store().get_now("prod", "web-v1").unwrap();
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let cluster = MemoryCluster::new();
        let ctx = PhaseContext::new(&cluster, "prod", RolloutConfig::default());
        let err = scale_workload(&ctx, "ghost", 1).await.unwrap_err();
        assert!(matches!(err, RolloutError::NotFound { .. }));
    }
}
