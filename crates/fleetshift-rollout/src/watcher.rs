//! Convergence watcher — block until a condition over live objects holds.
//!
//! The change feed is only a wake-up signal. Every check re-lists the
//! matching objects, so dropped or coalesced events cannot hide a state
//! change. The wait also resyncs every `poll_interval` without events.
//!
//! A wait ends in exactly one of four ways: the predicate holds, the
//! deadline passes (`TimedOut`), the cancel signal flips (`Cancelled`),
//! or the feed keeps failing (`Subscription`). The subscription is
//! dropped, and therefore closed, on every one of them.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use fleetshift_cluster::{ChangeEvent, ObjectApi, Subscription};
use fleetshift_core::{ListParams, Object};

use crate::error::{RolloutError, RolloutResult};

/// Consecutive feed failures tolerated before a wait gives up.
pub const MAX_RESUBSCRIBES: u32 = 3;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(50);

pub struct ConvergenceWatcher<'a, K: Object> {
    api: &'a dyn ObjectApi<K>,
    namespace: &'a str,
    params: ListParams,
    poll_interval: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, K: Object> ConvergenceWatcher<'a, K> {
    pub fn new(api: &'a dyn ObjectApi<K>, namespace: &'a str, params: ListParams) -> Self {
        Self {
            api,
            namespace,
            params,
            poll_interval: Duration::from_secs(3),
            cancel: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cancel_on(mut self, cancel: Option<watch::Receiver<bool>>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wait until `predicate` holds for the current set of matching objects.
    ///
    /// Returns that set. `what` names the condition in logs and errors.
    pub async fn wait_until<P>(
        &mut self,
        what: &str,
        timeout: Duration,
        mut predicate: P,
    ) -> RolloutResult<Vec<K>>
    where
        P: FnMut(&[K]) -> bool,
    {
        let expiry = tokio::time::sleep_until(Instant::now() + timeout);
        tokio::pin!(expiry);

        let mut failures = 0;
        let mut feed = self.subscribe(&mut failures).await?;

        loop {
            if is_cancelled(&self.cancel) {
                return Err(RolloutError::Cancelled);
            }
            let objects = self.api.list(self.namespace, &self.params).await?;
            if predicate(&objects) {
                debug!(kind = K::KIND, %what, matched = objects.len(), "condition met");
                return Ok(objects);
            }

            let mut lost = None;
            tokio::select! {
                event = feed.next() => match event {
                    Some(ChangeEvent::Error(reason)) => lost = Some(reason),
                    None => lost = Some("watch feed closed".to_string()),
                    Some(event) => {
                        failures = 0;
                        debug!(kind = K::KIND, event = event.kind_label(), %what, "watch wake-up, re-listing");
                    }
                },
                _ = tokio::time::sleep(self.poll_interval) => {
                    debug!(kind = K::KIND, %what, "resync, re-listing");
                }
                _ = &mut expiry => {
                    warn!(kind = K::KIND, %what, ?timeout, "wait timed out");
                    return Err(RolloutError::TimedOut {
                        what: what.to_string(),
                        timeout,
                    });
                }
                _ = cancelled(&mut self.cancel) => return Err(RolloutError::Cancelled),
            }

            if let Some(reason) = lost {
                failures += 1;
                if failures > MAX_RESUBSCRIBES {
                    return Err(RolloutError::Subscription(reason));
                }
                warn!(kind = K::KIND, %reason, attempt = failures, "watch lost, resubscribing");
                feed = self.subscribe(&mut failures).await?;
            }
        }
    }

    async fn subscribe(&self, failures: &mut u32) -> RolloutResult<Subscription<K>> {
        loop {
            match self.api.watch(self.namespace, &self.params).await {
                Ok(feed) => return Ok(feed),
                Err(e) => {
                    *failures += 1;
                    if *failures > MAX_RESUBSCRIBES {
                        return Err(RolloutError::Subscription(e.to_string()));
                    }
                    warn!(kind = K::KIND, error = %e, attempt = *failures, "watch failed, retrying");
                    tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                }
            }
        }
    }
}

pub(crate) fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves once the cancel signal reads `true`. Never resolves without a
/// signal or after its sender is gone.
pub(crate) async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
