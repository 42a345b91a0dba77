//! MemoryCluster — in-process implementation of the cluster facade.
//!
//! Objects live in per-kind maps keyed by `(namespace, name)`. Every write
//! takes a fresh resource version from a cluster-wide counter, so optimistic
//! updates behave like the real API. Watches fan out to small bounded
//! channels; when a subscriber falls behind, events are dropped rather
//! than blocking writers, so subscribers must re-list to learn the truth.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use fleetshift_core::{ListParams, Node, Object, Pod, Workload};

use crate::error::{ClusterError, ClusterResult};
use crate::facade::{ChangeEvent, Cluster, ClusterFuture, ObjectApi, Subscription};

/// Capacity of each watch feed.
pub const WATCH_BUFFER: usize = 16;

type Key = (String, String);

/// Failures injected into facade calls made by clients.
///
/// Writes performed by the simulator go through the unchecked store
/// methods and are never affected.
#[derive(Debug, Default)]
pub struct Faults {
    update_conflicts: Mutex<HashMap<&'static str, u32>>,
    failing_deletes: Mutex<HashSet<String>>,
    watch_failures: AtomicU32,
}

impl Faults {
    /// Make the next `n` updates of `kind` fail with `Conflict`.
    pub fn conflict_next_updates(&self, kind: &'static str, n: u32) {
        let mut conflicts = self.update_conflicts.lock().unwrap_or_else(PoisonError::into_inner);
        *conflicts.entry(kind).or_default() += n;
    }

    /// Make every delete of an object named `name` fail.
    pub fn fail_deletes_of(&self, name: &str) {
        self.failing_deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Make the next `n` watch calls fail.
    pub fn fail_next_watches(&self, n: u32) {
        self.watch_failures.fetch_add(n, Ordering::SeqCst);
    }

    fn take_conflict(&self, kind: &'static str) -> bool {
        let mut conflicts = self.update_conflicts.lock().unwrap_or_else(PoisonError::into_inner);
        match conflicts.get_mut(kind) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn delete_fails(&self, name: &str) -> bool {
        self.failing_deletes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn take_watch_failure(&self) -> bool {
        self.watch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct Watcher<K> {
    namespace: String,
    params: ListParams,
    tx: mpsc::Sender<ChangeEvent<K>>,
}

struct StoreInner<K> {
    objects: BTreeMap<Key, K>,
    watchers: Vec<Watcher<K>>,
}

/// Storage and change fan-out for one object kind.
pub struct Store<K> {
    inner: Arc<RwLock<StoreInner<K>>>,
    versions: Arc<AtomicU64>,
    faults: Arc<Faults>,
    /// Positive grace periods mark objects terminating instead of removing them.
    graceful_delete: bool,
}

impl<K> Clone for Store<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            versions: self.versions.clone(),
            faults: self.faults.clone(),
            graceful_delete: self.graceful_delete,
        }
    }
}

impl<K: Object> Store<K> {
    fn new(versions: Arc<AtomicU64>, faults: Arc<Faults>, graceful_delete: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                objects: BTreeMap::new(),
                watchers: Vec::new(),
            })),
            versions,
            faults,
            graceful_delete,
        }
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn key(namespace: &str, name: &str) -> Key {
        (namespace.to_string(), name.to_string())
    }

    fn not_found(name: &str) -> ClusterError {
        ClusterError::NotFound {
            kind: K::KIND,
            name: name.to_string(),
        }
    }

    /// Deliver an event to every interested watcher, pruning closed ones.
    fn publish(inner: &mut StoreInner<K>, event: ChangeEvent<K>, previous: Option<&K>) {
        inner.watchers.retain(|w| !w.tx.is_closed());
        for watcher in &inner.watchers {
            let interested = |obj: &K| {
                (watcher.namespace.is_empty() || watcher.namespace == obj.namespace())
                    && watcher.params.matches(obj)
            };
            let wants = event.object().is_some_and(|obj| interested(obj))
                || previous.is_some_and(|obj| interested(obj));
            if !wants {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = watcher.tx.try_send(event.clone()) {
                trace!(kind = K::KIND, "watch feed full, event coalesced");
            }
        }
    }

    pub fn get_now(&self, namespace: &str, name: &str) -> ClusterResult<K> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .objects
            .get(&Self::key(namespace, name))
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    pub fn list_now(&self, namespace: &str, params: &ListParams) -> Vec<K> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .filter(|(_, obj)| params.matches(*obj))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    pub fn create_now(&self, namespace: &str, mut obj: K) -> ClusterResult<K> {
        if obj.name().is_empty() {
            return Err(ClusterError::Invalid {
                kind: K::KIND,
                reason: "metadata.name is required".to_string(),
            });
        }
        obj.meta_mut().namespace = namespace.to_string();
        obj.meta_mut().resource_version = self.next_version();
        let key = Self::key(namespace, obj.name());

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: K::KIND,
                name: key.1,
            });
        }
        inner.objects.insert(key, obj.clone());
        Self::publish(&mut inner, ChangeEvent::Added(obj.clone()), None);
        Ok(obj)
    }

    /// Replace an object. With `check_version`, the caller's resource
    /// version must match the stored one.
    pub fn update_now(&self, namespace: &str, mut obj: K, check_version: bool) -> ClusterResult<K> {
        let key = Self::key(namespace, obj.name());
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(obj.name()))?;

        if check_version && previous.meta().resource_version != obj.meta().resource_version {
            return Err(ClusterError::Conflict {
                kind: K::KIND,
                name: key.1,
                reason: format!(
                    "resource version {} is stale (current {})",
                    obj.meta().resource_version,
                    previous.meta().resource_version
                ),
            });
        }

        obj.meta_mut().namespace = namespace.to_string();
        obj.meta_mut().resource_version = self.next_version();
        inner.objects.insert(key, obj.clone());
        Self::publish(&mut inner, ChangeEvent::Modified(obj.clone()), Some(&previous));
        Ok(obj)
    }

    pub fn delete_now(&self, namespace: &str, name: &str, grace_period_secs: Option<u64>) -> ClusterResult<()> {
        let key = Self::key(namespace, name);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(existing) = inner.objects.get(&key).cloned() else {
            return Err(Self::not_found(name));
        };

        let grace = grace_period_secs.unwrap_or(0);
        if self.graceful_delete && grace > 0 {
            if existing.meta().deletion_grace_secs.is_some() {
                return Ok(());
            }
            let mut marked = existing.clone();
            marked.meta_mut().deletion_grace_secs = Some(grace);
            marked.meta_mut().resource_version = self.next_version();
            inner.objects.insert(key, marked.clone());
            Self::publish(&mut inner, ChangeEvent::Modified(marked), Some(&existing));
            return Ok(());
        }

        inner.objects.remove(&key);
        Self::publish(&mut inner, ChangeEvent::Deleted(existing), None);
        Ok(())
    }

    pub fn watch_now(&self, namespace: &str, params: &ListParams) -> Subscription<K> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.watchers.push(Watcher {
            namespace: namespace.to_string(),
            params: params.clone(),
            tx,
        });
        Subscription::new(rx)
    }

    /// Number of open watches (closed ones are pruned first).
    pub fn active_watches(&self) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.watchers.retain(|w| !w.tx.is_closed());
        inner.watchers.len()
    }
}

impl<K: Object> ObjectApi<K> for Store<K> {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> ClusterFuture<'a, K> {
        Box::pin(async move { self.get_now(namespace, name) })
    }

    fn list<'a>(&'a self, namespace: &'a str, params: &'a ListParams) -> ClusterFuture<'a, Vec<K>> {
        Box::pin(async move { Ok(self.list_now(namespace, params)) })
    }

    fn create<'a>(&'a self, namespace: &'a str, obj: K) -> ClusterFuture<'a, K> {
        Box::pin(async move {
            let created = self.create_now(namespace, obj)?;
            debug!(kind = K::KIND, name = %created.name(), namespace, "object created");
            Ok(created)
        })
    }

    fn update<'a>(&'a self, namespace: &'a str, obj: K) -> ClusterFuture<'a, K> {
        Box::pin(async move {
            if self.faults.take_conflict(K::KIND) {
                return Err(ClusterError::Conflict {
                    kind: K::KIND,
                    name: obj.name().to_string(),
                    reason: "injected conflict".to_string(),
                });
            }
            self.update_now(namespace, obj, true)
        })
    }

    fn delete<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        grace_period_secs: Option<u64>,
    ) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            if self.faults.delete_fails(name) {
                return Err(ClusterError::Api(format!("injected delete failure for {name}")));
            }
            self.delete_now(namespace, name, grace_period_secs)?;
            debug!(kind = K::KIND, name, namespace, "object deleted");
            Ok(())
        })
    }

    fn watch<'a>(
        &'a self,
        namespace: &'a str,
        params: &'a ListParams,
    ) -> ClusterFuture<'a, Subscription<K>> {
        Box::pin(async move {
            if self.faults.take_watch_failure() {
                return Err(ClusterError::Api("injected watch failure".to_string()));
            }
            Ok(self.watch_now(namespace, params))
        })
    }
}

/// Thread-safe in-memory cluster. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryCluster {
    workloads: Store<Workload>,
    pods: Store<Pod>,
    nodes: Store<Node>,
    faults: Arc<Faults>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let versions = Arc::new(AtomicU64::new(0));
        let faults = Arc::new(Faults::default());
        Self {
            workloads: Store::new(versions.clone(), faults.clone(), false),
            pods: Store::new(versions.clone(), faults.clone(), true),
            nodes: Store::new(versions, faults.clone(), false),
            faults,
        }
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub fn workload_store(&self) -> &Store<Workload> {
        &self.workloads
    }

    pub fn pod_store(&self) -> &Store<Pod> {
        &self.pods
    }

    pub fn node_store(&self) -> &Store<Node> {
        &self.nodes
    }
}

impl Cluster for MemoryCluster {
    fn workloads(&self) -> &dyn ObjectApi<Workload> {
        &self.workloads
    }

    fn pods(&self) -> &dyn ObjectApi<Pod> {
        &self.pods
    }

    fn nodes(&self) -> &dyn ObjectApi<Node> {
        &self.nodes
    }
}
