//! Cluster facade error types.

use thiserror::Error;

/// Result type alias for cluster API calls.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by the cluster API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("conflict writing {kind} {name}: {reason}")]
    Conflict {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. } | ClusterError::AlreadyExists { .. })
    }
}
