//! Shared state threaded through every phase of one rollout.

use std::future::Future;

use tokio::sync::watch;

use fleetshift_cluster::Cluster;
use fleetshift_core::{ListParams, Pod};

use crate::error::{RolloutError, RolloutResult};
use crate::strategy::RolloutConfig;
use crate::watcher::{cancelled, is_cancelled, ConvergenceWatcher};

pub struct PhaseContext<'a> {
    pub cluster: &'a dyn Cluster,
    pub namespace: String,
    pub config: RolloutConfig,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> PhaseContext<'a> {
    pub fn new(cluster: &'a dyn Cluster, namespace: &str, config: RolloutConfig) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
            config,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: Option<watch::Receiver<bool>>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fail with `Cancelled` once the cancel signal has flipped.
    pub fn ensure_active(&self) -> RolloutResult<()> {
        if is_cancelled(&self.cancel) {
            return Err(RolloutError::Cancelled);
        }
        Ok(())
    }

    /// Watcher over pods in the rollout's namespace.
    pub fn pod_watcher(&self, params: ListParams) -> ConvergenceWatcher<'_, Pod> {
        ConvergenceWatcher::new(self.cluster.pods(), &self.namespace, params)
            .poll_interval(self.config.poll_interval)
            .cancel_on(self.cancel.clone())
    }

    /// Run a non-waiting step under the phase timeout and the cancel signal.
    pub async fn bounded<T, F>(&self, what: &str, step: F) -> RolloutResult<T>
    where
        F: Future<Output = RolloutResult<T>>,
    {
        let mut cancel = self.cancel.clone();
        let timeout = self.config.phase_timeout;
        tokio::select! {
            result = tokio::time::timeout(timeout, step) => match result {
                Ok(result) => result,
                Err(_) => Err(RolloutError::TimedOut {
                    what: what.to_string(),
                    timeout,
                }),
            },
            _ = cancelled(&mut cancel) => Err(RolloutError::Cancelled),
        }
    }
}
