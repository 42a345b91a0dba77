//! fleetshift-api — REST API for fleetshift.
//!
//! Exposes the two rollout entry points plus read-only inspection of the
//! cluster the daemon manages.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/namespaces/{ns}/workloads` | List workloads with pod counts |
//! | GET | `/api/v1/namespaces/{ns}/workloads/{name}` | Workload and its pods |
//! | DELETE | `/api/v1/namespaces/{ns}/workloads/{name}` | Delete a workload and its pods |
//! | PUT | `/api/v1/namespaces/{ns}/workloads/{name}/replicas` | Set desired replicas |
//! | POST | `/api/v1/namespaces/{ns}/workloads/{name}/rolling-update` | Start a fleet-wide rollout |
//! | POST | `/api/v1/namespaces/{ns}/workloads/{name}/rolling-update-by-node` | Start a node-grouped rollout |
//! | GET | `/api/v1/rollouts` | List rollouts |
//! | GET | `/api/v1/rollouts/{id}` | Rollout progress and outcome |
//! | GET | `/api/v1/nodes` | List nodes |

pub mod handlers;
pub mod rollout_handlers;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use fleetshift_cluster::Cluster;
use fleetshift_core::RolloutDefaults;

pub use rollout_handlers::{RolloutStatus, RolloutTracker};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub cluster: Arc<dyn Cluster>,
    /// Applied to rollout request fields left at zero or empty.
    pub defaults: RolloutDefaults,
    pub rollouts: RolloutTracker,
}

impl ApiState {
    pub fn new(cluster: Arc<dyn Cluster>, defaults: RolloutDefaults) -> Self {
        Self {
            cluster,
            defaults,
            rollouts: RolloutTracker::default(),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/namespaces/{ns}/workloads", get(handlers::list_workloads))
        .route(
            "/namespaces/{ns}/workloads/{name}",
            get(handlers::get_workload).delete(handlers::delete_workload),
        )
        .route(
            "/namespaces/{ns}/workloads/{name}/replicas",
            put(handlers::set_replicas),
        )
        .route(
            "/namespaces/{ns}/workloads/{name}/rolling-update",
            post(rollout_handlers::start_rolling_update),
        )
        .route(
            "/namespaces/{ns}/workloads/{name}/rolling-update-by-node",
            post(rollout_handlers::start_rolling_update_by_node),
        )
        .route("/rollouts", get(rollout_handlers::list_rollouts))
        .route("/rollouts/{id}", get(rollout_handlers::get_rollout))
        .route("/nodes", get(handlers::list_nodes))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
