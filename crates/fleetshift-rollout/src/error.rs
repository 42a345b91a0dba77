//! Rollout error types.

use std::time::Duration;

use thiserror::Error;

use fleetshift_cluster::ClusterError;
use fleetshift_core::ManifestError;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Why a rollout stopped.
///
/// Every failure aborts the whole rollout; the cluster is left as the
/// last completed phase left it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RolloutError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("bad rollout input: {0}")]
    BadFormat(String),

    #[error("manifest specifies multiple items ({0}), expected exactly one")]
    MultipleItems(usize),

    #[error("workload {workload} has no {label} node selector in its pod template")]
    MissingPartitionLabel { workload: String, label: String },

    #[error("no node is labelled {label}={value}")]
    NoEligibleCapacityUnit { label: String, value: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out after {timeout:?} waiting for {what}")]
    TimedOut { what: String, timeout: Duration },

    #[error(transparent)]
    Cluster(ClusterError),

    #[error("watch subscription failed: {0}")]
    Subscription(String),

    #[error("rollout cancelled")]
    Cancelled,
}

impl From<ClusterError> for RolloutError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound { kind, name } => RolloutError::NotFound { kind, name },
            e if e.is_conflict() => RolloutError::Conflict(e.to_string()),
            e => RolloutError::Cluster(e),
        }
    }
}

impl From<ManifestError> for RolloutError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::BadFormat(reason) => RolloutError::BadFormat(reason),
            ManifestError::MultipleItems(n) => RolloutError::MultipleItems(n),
        }
    }
}

impl RolloutError {
    /// Whether the request itself was at fault, as opposed to the cluster.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            RolloutError::BadFormat(_)
                | RolloutError::MultipleItems(_)
                | RolloutError::MissingPartitionLabel { .. }
        )
    }
}
