//! REST API handlers for rollout management.
//!
//! Rollouts run as background tasks. Starting one validates the request
//! synchronously, registers it with the [`RolloutTracker`] and answers
//! `202 Accepted`; progress is read back through `/api/v1/rollouts`.
//! The tracker lives in memory only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use fleetshift_cluster::Cluster;
use fleetshift_core::{parse_workload, Object};
use fleetshift_rollout::{
    ByNodeConfig, Rollout, RolloutConfig, RolloutError, RolloutProgress, RolloutRequest,
    RolloutResult, RolloutStrategy, RolloutSummary,
};

use crate::handlers::{error_response, rollout_error_response, ApiResponse};
use crate::ApiState;

// ── Tracker ────────────────────────────────────────────────────

struct TrackedRollout {
    id: String,
    namespace: String,
    old_workload: String,
    new_workload: String,
    strategy: &'static str,
    progress: watch::Receiver<RolloutProgress>,
    outcome: Option<RolloutResult<RolloutSummary>>,
}

impl TrackedRollout {
    fn is_active(&self) -> bool {
        self.outcome.is_none() && !self.progress.borrow().state.is_terminal()
    }
}

/// Serializable rollout status for API responses.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct RolloutStatus {
    pub id: String,
    pub namespace: String,
    pub old_workload: String,
    pub new_workload: String,
    pub strategy: String,
    pub progress: RolloutProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RolloutSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TrackedRollout> for RolloutStatus {
    fn from(r: &TrackedRollout) -> Self {
        let (summary, error) = match &r.outcome {
            Some(Ok(summary)) => (Some(summary.clone()), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };
        Self {
            id: r.id.clone(),
            namespace: r.namespace.clone(),
            old_workload: r.old_workload.clone(),
            new_workload: r.new_workload.clone(),
            strategy: r.strategy.to_string(),
            progress: r.progress.borrow().clone(),
            summary,
            error,
        }
    }
}

/// In-memory registry of started rollouts.
#[derive(Clone, Default)]
pub struct RolloutTracker {
    rollouts: Arc<RwLock<HashMap<String, TrackedRollout>>>,
    next_id: Arc<AtomicU64>,
}

impl RolloutTracker {
    /// Register `request` and run it in the background.
    ///
    /// Fails with `Conflict` while another rollout of the same old
    /// workload is still running.
    pub async fn start(
        &self,
        cluster: Arc<dyn Cluster>,
        request: RolloutRequest,
        new_workload: &str,
    ) -> RolloutResult<RolloutStatus> {
        let (tx, rx) = watch::channel(RolloutProgress::default());
        let id = {
            let mut rollouts = self.rollouts.write().await;
            let busy = rollouts.values().any(|r| {
                r.namespace == request.namespace && r.old_workload == request.old_name && r.is_active()
            });
            if busy {
                return Err(RolloutError::Conflict(format!(
                    "a rollout of {}/{} is already in progress",
                    request.namespace, request.old_name
                )));
            }

            let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let id = format!("{}-{}-{seq}", request.namespace, request.old_name);
            rollouts.insert(
                id.clone(),
                TrackedRollout {
                    id: id.clone(),
                    namespace: request.namespace.clone(),
                    old_workload: request.old_name.clone(),
                    new_workload: new_workload.to_string(),
                    strategy: request.strategy.name(),
                    progress: rx,
                    outcome: None,
                },
            );
            id
        };
        info!(
            rollout = %id,
            workload = %request.old_name,
            new_workload,
            strategy = request.strategy.name(),
            "rollout accepted"
        );

        let tracker = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = Rollout::new(cluster.as_ref(), request)
                .with_progress(tx)
                .run()
                .await;
            if let Err(e) = &outcome {
                warn!(rollout = %task_id, error = %e, "rollout ended with an error");
            }
            tracker.finish(&task_id, outcome).await;
        });

        self.get(&id)
            .await
            .ok_or_else(|| RolloutError::NotFound {
                kind: "Rollout",
                name: id,
            })
    }

    async fn finish(&self, id: &str, outcome: RolloutResult<RolloutSummary>) {
        if let Some(rollout) = self.rollouts.write().await.get_mut(id) {
            rollout.outcome = Some(outcome);
        }
    }

    pub async fn get(&self, id: &str) -> Option<RolloutStatus> {
        self.rollouts.read().await.get(id).map(RolloutStatus::from)
    }

    /// Every tracked rollout, ordered by id.
    pub async fn list(&self) -> Vec<RolloutStatus> {
        let rollouts = self.rollouts.read().await;
        let mut statuses: Vec<RolloutStatus> = rollouts.values().map(RolloutStatus::from).collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

// ── Requests ───────────────────────────────────────────────────

/// Body of a fleet-wide rolling update.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct RollingUpdateRequest {
    /// Name of the new workload. Must match the manifest when set.
    #[serde(default)]
    pub name: String,
    /// Manifest of the new workload (YAML or JSON).
    pub content: String,
}

/// Body of a node-grouped rolling update. Durations are in seconds;
/// zero selects the configured default.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RollingUpdateByNodeRequest {
    #[serde(default)]
    pub name: String,
    pub content: String,
    /// Partition label key. Empty selects the configured default.
    #[serde(default)]
    pub nodelabel: String,
    #[serde(default)]
    pub poll_interval: u64,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub deletion_timeout: u64,
    #[serde(default)]
    pub creation_timeout: u64,
}

/// Check the manifest and the old workload before anything is spawned.
/// Returns the new workload's name.
async fn precheck(
    state: &ApiState,
    ns: &str,
    old_name: &str,
    requested_name: &str,
    content: &str,
) -> RolloutResult<String> {
    let new = parse_workload(content)?;
    if !requested_name.is_empty() && requested_name != new.name() {
        return Err(RolloutError::BadFormat(format!(
            "request names {requested_name} but the manifest names {}",
            new.name()
        )));
    }
    state.cluster.workloads().get(ns, old_name).await?;
    Ok(new.name().to_string())
}

async fn start(
    state: &ApiState,
    request: RolloutRequest,
    new_workload: &str,
) -> axum::response::Response {
    match state
        .rollouts
        .start(state.cluster.clone(), request, new_workload)
        .await
    {
        Ok(status) => (StatusCode::ACCEPTED, ApiResponse::ok(status)).into_response(),
        Err(e) => rollout_error_response(&e),
    }
}

/// POST /api/v1/namespaces/:ns/workloads/:name/rolling-update
pub async fn start_rolling_update(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(req): Json<RollingUpdateRequest>,
) -> impl IntoResponse {
    let new_workload = match precheck(&state, &ns, &name, &req.name, &req.content).await {
        Ok(new_workload) => new_workload,
        Err(e) => return rollout_error_response(&e),
    };
    let request = RolloutRequest {
        namespace: ns,
        old_name: name,
        manifest: req.content,
        strategy: RolloutStrategy::FleetWide,
        config: RolloutConfig::from(&state.defaults),
    };
    start(&state, request, &new_workload).await
}

/// POST /api/v1/namespaces/:ns/workloads/:name/rolling-update-by-node
pub async fn start_rolling_update_by_node(
    State(state): State<ApiState>,
    Path((ns, name)): Path<(String, String)>,
    Json(req): Json<RollingUpdateByNodeRequest>,
) -> impl IntoResponse {
    let label = if req.nodelabel.is_empty() {
        state.defaults.partition_label.clone().unwrap_or_default()
    } else {
        req.nodelabel.clone()
    };
    if label.is_empty() {
        return error_response(
            "nodelabel is required: none given and no default configured",
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    let new_workload = match precheck(&state, &ns, &name, &req.name, &req.content).await {
        Ok(new_workload) => new_workload,
        Err(e) => return rollout_error_response(&e),
    };
    let config = RolloutConfig::from(&state.defaults).with_overrides(
        req.poll_interval,
        req.timeout,
        req.deletion_timeout,
        req.creation_timeout,
    );
    let request = RolloutRequest {
        namespace: ns,
        old_name: name,
        manifest: req.content,
        strategy: RolloutStrategy::ByNode(ByNodeConfig {
            partition_label: label,
            quarantine_value: state.defaults.quarantine_value.clone(),
        }),
        config,
    };
    start(&state, request, &new_workload).await
}

// ── Inspection ─────────────────────────────────────────────────

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.rollouts.list().await).into_response()
}

/// GET /api/v1/rollouts/:id
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.rollouts.get(&id).await {
        Some(status) => ApiResponse::ok(status).into_response(),
        None => error_response("rollout not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// Whether the rollout behind `status` has returned.
pub fn is_finished(status: &RolloutStatus) -> bool {
    status.summary.is_some() || status.error.is_some()
}
