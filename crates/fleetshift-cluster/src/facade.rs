//! The cluster facade consumed by the rollout engine.
//!
//! One [`ObjectApi`] per object kind, modelled on the cluster's own REST
//! surface: get/list/create/update/delete plus a filtered change feed.
//! Methods return boxed futures so the traits stay object-safe and a
//! rollout can run against `&dyn Cluster`.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use fleetshift_core::{ListParams, Node, Object, Pod, Workload};

use crate::error::ClusterResult;

/// Boxed future returned by every facade call.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// One notification on a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// The feed hit an error; the subscriber should re-list and may resubscribe.
    Error(String),
}

impl<K: Object> ChangeEvent<K> {
    /// The object carried by this event, if any.
    pub fn object(&self) -> Option<&K> {
        match self {
            ChangeEvent::Added(obj) | ChangeEvent::Modified(obj) | ChangeEvent::Deleted(obj) => {
                Some(obj)
            }
            ChangeEvent::Error(_) => None,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "added",
            ChangeEvent::Modified(_) => "modified",
            ChangeEvent::Deleted(_) => "deleted",
            ChangeEvent::Error(_) => "error",
        }
    }
}

/// Receiving end of a watch.
///
/// Events arrive in order on a small bounded feed. Dropping the
/// subscription closes it; the producer notices and stops delivering.
#[derive(Debug)]
pub struct Subscription<K> {
    rx: mpsc::Receiver<ChangeEvent<K>>,
}

impl<K> Subscription<K> {
    pub fn new(rx: mpsc::Receiver<ChangeEvent<K>>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the producer has gone away.
    pub async fn next(&mut self) -> Option<ChangeEvent<K>> {
        self.rx.recv().await
    }

    /// Non-blocking poll for an already delivered event.
    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<ChangeEvent<K>> {
        self.rx.try_recv().ok()
    }
}

/// CRUD + watch for a single object kind.
///
/// `namespace` is ignored for cluster-scoped kinds (nodes); an empty
/// namespace on `list`/`watch` spans all namespaces.
pub trait ObjectApi<K: Object>: Send + Sync {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, K>;

    fn list<'a>(&'a self, namespace: &'a str, params: &'a ListParams) -> ClusterFuture<'a, Vec<K>>;

    fn create<'a>(&'a self, namespace: &'a str, obj: K) -> ClusterFuture<'a, K>;

    /// Optimistic update: `obj.metadata.resource_version` must match the
    /// stored object or the call fails with `Conflict`.
    fn update<'a>(&'a self, namespace: &'a str, obj: K) -> ClusterFuture<'a, K>;

    fn delete<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        grace_period_secs: Option<u64>,
    ) -> ClusterFuture<'a, ()>;

    fn watch<'a>(
        &'a self,
        namespace: &'a str,
        params: &'a ListParams,
    ) -> ClusterFuture<'a, Subscription<K>>;
}

/// Entry point to the per-kind APIs.
pub trait Cluster: Send + Sync {
    fn workloads(&self) -> &dyn ObjectApi<Workload>;
    fn pods(&self) -> &dyn ObjectApi<Pod>;
    fn nodes(&self) -> &dyn ObjectApi<Node>;
}
