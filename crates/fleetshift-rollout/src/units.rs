//! Capacity unit enumeration.
//!
//! A capacity unit is a node. The units a rollout migrates are the nodes
//! whose partition label still routes to the old workload, plus any node
//! left in quarantine by an interrupted run. They are processed in name
//! order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetshift_cluster::Cluster;
use fleetshift_core::selector::{sanitize_label_value, validate_label_value};
use fleetshift_core::{ListParams, Object, Pod, Selector};

use crate::context::PhaseContext;
use crate::error::{RolloutError, RolloutResult};

/// A node to migrate and the old pods it held when the rollout started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityUnit {
    pub node: String,
    pub old_pods: u32,
}

/// Label value parked on a node while it drains.
///
/// Uses `configured` when given, otherwise derives `{old}-to-{new}`. The
/// result never equals either workload's value, so neither workload can
/// place pods on a quarantined node.
pub fn quarantine_value(configured: Option<&str>, old: &str, new: &str) -> RolloutResult<String> {
    let preferred = match configured {
        Some(value) => {
            validate_label_value(value)
                .map_err(|e| RolloutError::BadFormat(format!("quarantine value: {e}")))?;
            value.to_string()
        }
        None => sanitize_label_value(&format!("{old}-to-{new}")),
    };
    let value = [preferred.as_str(), "draining", "quarantine", "cordoned"]
        .into_iter()
        .find(|v| !v.is_empty() && *v != old && *v != new)
        .unwrap_or("cordoned")
        .to_string();
    Ok(value)
}

/// Nodes whose `label` is one of `values`, sorted by name, each with the
/// number of `old_selector` pods bound to it.
pub async fn enumerate_units(
    ctx: &PhaseContext<'_>,
    label: &str,
    values: &[&str],
    old_selector: &Selector,
) -> RolloutResult<Vec<CapacityUnit>> {
    let params = ListParams::labels(Selector::everything().exists(label));
    let mut nodes: Vec<String> = ctx
        .cluster
        .nodes()
        .list("", &params)
        .await?
        .into_iter()
        .filter(|node| node.label(label).is_some_and(|v| values.contains(&v)))
        .map(|node| node.metadata.name)
        .collect();
    nodes.sort();

    let by_node = pods_by_node(ctx.cluster, &ctx.namespace, old_selector).await?;
    let units: Vec<CapacityUnit> = nodes
        .into_iter()
        .map(|node| {
            let old_pods = by_node.get(&node).map_or(0, |pods| pods.len() as u32);
            CapacityUnit { node, old_pods }
        })
        .collect();
    debug!(label, count = units.len(), "enumerated capacity units");
    Ok(units)
}

/// Live pods matching `selector`, grouped by the node they are bound to.
///
/// Unbound and terminating pods are left out.
pub async fn pods_by_node(
    cluster: &dyn Cluster,
    namespace: &str,
    selector: &Selector,
) -> RolloutResult<BTreeMap<String, Vec<Pod>>> {
    let pods = cluster
        .pods()
        .list(namespace, &ListParams::labels(selector.clone()))
        .await?;
    let mut by_node: BTreeMap<String, Vec<Pod>> = BTreeMap::new();
    for pod in pods.into_iter().filter(|p| !p.is_terminating()) {
        if let Some(node) = pod.node_name().map(str::to_string) {
            by_node.entry(node).or_default().push(pod);
        }
    }
    Ok(by_node)
}

/// Names of `pods`, for logging.
pub fn pod_names(pods: &[Pod]) -> Vec<&str> {
    pods.iter().map(|p| p.name()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetshift_cluster::MemoryCluster;
    use fleetshift_core::{labels, Node, PodTemplate, TemplateMeta};

    use crate::strategy::RolloutConfig;

    fn pod(name: &str, version: &str, node: Option<&str>) -> Pod {
        let template = PodTemplate {
            metadata: TemplateMeta {
                labels: labels([("app", "web"), ("version", version)]),
            },
            ..Default::default()
        };
        let mut pod = Pod::from_template("prod", name, &template);
        pod.spec.node_name = node.map(str::to_string);
        pod
    }

    #[test]
    fn derived_quarantine_value() {
        assert_eq!(quarantine_value(None, "v1", "v2").unwrap(), "v1-to-v2");
        assert_eq!(
            quarantine_value(Some("parked"), "v1", "v2").unwrap(),
            "parked"
        );
    }

    #[test]
    fn quarantine_value_never_collides() {
        assert_eq!(quarantine_value(Some("v1"), "v1", "v2").unwrap(), "draining");
        assert_eq!(
            quarantine_value(Some("draining"), "draining", "quarantine").unwrap(),
            "cordoned"
        );
    }

    #[test]
    fn invalid_configured_quarantine_value_is_rejected() {
        let err = quarantine_value(Some("not valid!"), "v1", "v2").unwrap_err();
        assert!(matches!(err, RolloutError::BadFormat(_)));
    }

    #[tokio::test]
    async fn enumerates_sorted_units_with_old_pod_counts() {
        let cluster = MemoryCluster::new();
        let nodes = cluster.node_store();
        nodes.create_now("", Node::new("node-c", labels([("web_version", "v1")]))).unwrap();
        nodes.create_now("", Node::new("node-a", labels([("web_version", "v1-to-v2")]))).unwrap();
        nodes.create_now("", Node::new("node-b", labels([("web_version", "v2")]))).unwrap();
        nodes.create_now("", Node::new("node-d", labels([("other", "x")]))).unwrap();

        let pods = cluster.pod_store();
        pods.create_now("prod", pod("web-v1-1", "v1", Some("node-c"))).unwrap();
        pods.create_now("prod", pod("web-v1-2", "v1", Some("node-c"))).unwrap();
        pods.create_now("prod", pod("web-v1-3", "v1", None)).unwrap();
        pods.create_now("prod", pod("web-v2-1", "v2", Some("node-a"))).unwrap();

        let ctx = PhaseContext::new(&cluster, "prod", RolloutConfig::default());
        let old = Selector::from_map(&labels([("app", "web"), ("version", "v1")]));
        let units = enumerate_units(&ctx, "web_version", &["v1", "v1-to-v2"], &old)
            .await
            .unwrap();
        assert_eq!(
            units,
            vec![
                CapacityUnit { node: "node-a".into(), old_pods: 0 },
                CapacityUnit { node: "node-c".into(), old_pods: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn terminating_pods_are_not_counted() {
        let cluster = MemoryCluster::new();
        let pods = cluster.pod_store();
        pods.create_now("prod", pod("web-v1-1", "v1", Some("node-a"))).unwrap();
        pods.create_now("prod", pod("web-v1-2", "v1", Some("node-a"))).unwrap();
        pods.delete_now("prod", "web-v1-2", Some(30)).unwrap();

        let old = Selector::from_map(&labels([("version", "v1")]));
        let by_node = pods_by_node(&cluster, "prod", &old).await.unwrap();
        assert_eq!(pod_names(&by_node["node-a"]), vec!["web-v1-1"]);
    }
}
