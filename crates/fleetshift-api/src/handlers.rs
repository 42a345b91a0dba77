//! REST API handlers for workloads and nodes.
//!
//! Each handler talks to the cluster through the facade and returns the
//! `{success, data?, error?}` JSON envelope.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use fleetshift_cluster::ClusterError;
use fleetshift_core::{ListParams, Object, Pod, PodInfo, Workload};
use fleetshift_rollout::update::scale_workload;
use fleetshift_rollout::{PhaseContext, RolloutConfig, RolloutError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status for a failed rollout or rollout-style operation.
pub(crate) fn status_for(err: &RolloutError) -> StatusCode {
    match err {
        RolloutError::NotFound { .. } => StatusCode::NOT_FOUND,
        RolloutError::Conflict(_) => StatusCode::CONFLICT,
        e if e.is_invalid_input() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn rollout_error_response(err: &RolloutError) -> axum::response::Response {
    error_response(&err.to_string(), status_for(err)).into_response()
}

fn cluster_error_response(err: ClusterError) -> axum::response::Response {
    rollout_error_response(&RolloutError::from(err))
}

// ── Workloads ──────────────────────────────────────────────────

/// A workload with aggregate pod counts.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct WorkloadView {
    pub workload: Workload,
    pub pods: PodInfo,
}

/// A workload with the pods its selector matches.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct WorkloadDetail {
    pub workload: Workload,
    pub info: PodInfo,
    pub pods: Vec<Pod>,
}

async fn pods_of(state: &ApiState, workload: &Workload) -> Result<Vec<Pod>, ClusterError> {
    state
        .cluster
        .pods()
        .list(workload.namespace(), &ListParams::labels(workload.pod_selector()))
        .await
}

/// GET /api/v1/namespaces/:ns/workloads
pub async fn list_workloads(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
) -> impl IntoResponse {
    let workloads = match state.cluster.workloads().list(&ns, &ListParams::default()).await {
        Ok(workloads) => workloads,
        Err(e) => return cluster_error_response(e),
    };

    let mut views = Vec::with_capacity(workloads.len());
    for workload in workloads {
        let pods = match pods_of(&state, &workload).await {
            Ok(pods) => pods,
            Err(e) => return cluster_error_response(e),
        };
        let info = PodInfo::collect(&workload, &pods);
        views.push(WorkloadView {
            workload,
            pods: info,
        });
    }
    ApiResponse::ok(views).into_response()
}

/// GET /api/v1/namespaces/:ns/workloads/:name
pub async fn get_workload(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let workload = match state.cluster.workloads().get(&ns, &name).await {
        Ok(workload) => workload,
        Err(e) => return cluster_error_response(e),
    };
    match pods_of(&state, &workload).await {
        Ok(pods) => ApiResponse::ok(WorkloadDetail {
            info: PodInfo::collect(&workload, &pods),
            workload,
            pods,
        })
        .into_response(),
        Err(e) => cluster_error_response(e),
    }
}

/// DELETE /api/v1/namespaces/:ns/workloads/:name
///
/// Removes the workload, then the pods it was managing.
pub async fn delete_workload(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let workload = match state.cluster.workloads().get(&ns, &name).await {
        Ok(workload) => workload,
        Err(e) => return cluster_error_response(e),
    };
    if let Err(e) = state.cluster.workloads().delete(&ns, &name, None).await {
        return cluster_error_response(e);
    }

    let pods = match pods_of(&state, &workload).await {
        Ok(pods) => pods,
        Err(e) => return cluster_error_response(e),
    };
    let grace = Some(state.defaults.grace_period_secs);
    let mut deleted = 0u32;
    for pod in &pods {
        match state.cluster.pods().delete(&ns, pod.name(), grace).await {
            Ok(()) => deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return cluster_error_response(e),
        }
    }
    info!(workload = %name, namespace = %ns, pods = deleted, "deleted workload");
    ApiResponse::ok(serde_json::json!({
        "workload": name,
        "pods_deleted": deleted,
    }))
    .into_response()
}

/// Replica update body.
#[derive(serde::Deserialize)]
pub struct ReplicasRequest {
    pub replicas: u32,
}

/// PUT /api/v1/namespaces/:ns/workloads/:name/replicas
pub async fn set_replicas(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(req): Json<ReplicasRequest>,
) -> impl IntoResponse {
    let config = RolloutConfig::from(&state.defaults);
    let ctx = PhaseContext::new(state.cluster.as_ref(), &ns, config);
    match scale_workload(&ctx, &name, req.replicas).await {
        Ok(workload) => ApiResponse::ok(workload).into_response(),
        Err(e) => rollout_error_response(&e),
    }
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<ApiState>) -> impl IntoResponse {
    match state.cluster.nodes().list("", &ListParams::default()).await {
        Ok(nodes) => ApiResponse::ok(nodes).into_response(),
        Err(e) => cluster_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fleetshift_cluster::MemoryCluster;
    use fleetshift_core::{labels, Node, RolloutDefaults};

    fn test_state() -> (ApiState, MemoryCluster) {
        let cluster = MemoryCluster::new();
        let state = ApiState::new(Arc::new(cluster.clone()), RolloutDefaults::default());
        (state, cluster)
    }

    fn seed_web(cluster: &MemoryCluster, ready: usize) {
        let workload = Workload::new("prod", "web", 3, labels([("app", "web")]));
        let template = workload.spec.template.clone();
        cluster.workload_store().create_now("prod", workload).unwrap();
        for i in 0..3 {
            let mut pod = Pod::from_template("prod", &format!("web-{i:05}"), &template);
            if i < ready {
                pod.status.phase = fleetshift_core::PodPhase::Running;
                pod.status.ready = true;
            }
            cluster.pod_store().create_now("prod", pod).unwrap();
        }
    }

    #[tokio::test]
    async fn list_workloads_empty() {
        let (state, _) = test_state();
        let resp = list_workloads(State(state), Path("prod".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn workload_detail_counts_pods() {
        let (state, cluster) = test_state();
        seed_web(&cluster, 2);

        let resp = get_workload(State(state), Path(("prod".to_string(), "web".to_string()))).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["info"]["desired"], 3);
        assert_eq!(json["data"]["info"]["running"], 2);
        assert_eq!(json["data"]["info"]["pending"], 1);
        assert_eq!(json["data"]["pods"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn get_nonexistent_workload() {
        let (state, _) = test_state();
        let resp = get_workload(State(state), Path(("prod".to_string(), "nope".to_string()))).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn set_replicas_updates_spec() {
        let (state, cluster) = test_state();
        seed_web(&cluster, 3);

        let resp = set_replicas(
            State(state),
            Path(("prod".to_string(), "web".to_string())),
            Json(ReplicasRequest { replicas: 5 }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(cluster.workload_store().get_now("prod", "web").unwrap().spec.replicas, 5);
    }

    #[tokio::test]
    async fn set_replicas_of_missing_workload() {
        let (state, _) = test_state();
        let resp = set_replicas(
            State(state),
            Path(("prod".to_string(), "nope".to_string())),
            Json(ReplicasRequest { replicas: 1 }),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_workload_removes_pods() {
        let (state, cluster) = test_state();
        seed_web(&cluster, 3);

        let resp = delete_workload(State(state), Path(("prod".to_string(), "web".to_string()))).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert!(cluster.workload_store().get_now("prod", "web").is_err());
        assert!(cluster.pod_store().list_now("prod", &ListParams::default()).is_empty());
    }

    #[tokio::test]
    async fn delete_nonexistent_workload() {
        let (state, _) = test_state();
        let resp = delete_workload(State(state), Path(("prod".to_string(), "nope".to_string()))).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_nodes_returns_seeded_nodes() {
        let (state, cluster) = test_state();
        cluster
            .node_store()
            .create_now("", Node::new("node-a", labels([("web_version", "v1")])))
            .unwrap();

        let resp = list_nodes(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"][0]["metadata"]["name"], "node-a");
    }

    #[test]
    fn rollout_errors_map_to_status_codes() {
        let not_found = RolloutError::NotFound {
            kind: "Workload",
            name: "web".to_string(),
        };
        assert_eq!(status_for(&not_found), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&RolloutError::MultipleItems(2)), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RolloutError::BadFormat("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&RolloutError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status_for(&RolloutError::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
