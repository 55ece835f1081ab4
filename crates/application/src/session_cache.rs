use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use keystone_core::{AppError, AppResult, IdentityKey};
use keystone_domain::PermissionSnapshot;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::PermissionProvider;

/// Shared handle to one snapshot computation.
pub type SnapshotFuture = Shared<BoxFuture<'static, AppResult<Arc<PermissionSnapshot>>>>;

/// Computes a fresh snapshot for one identity.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Runs one full computation.
    async fn compute(&self, identity: IdentityKey) -> AppResult<PermissionSnapshot>;
}

struct InFlight {
    ticket: u64,
    future: SnapshotFuture,
    abort: AbortHandle,
}

struct SessionCacheInner {
    source: Arc<dyn SnapshotSource>,
    snapshots: DashMap<IdentityKey, Arc<PermissionSnapshot>>,
    in_flight: DashMap<IdentityKey, InFlight>,
    next_ticket: AtomicU64,
}

impl SessionCacheInner {
    /// Publishes a finished computation if its registry entry is still current.
    ///
    /// The registry entry stays locked while the snapshot is stored, so an
    /// invalidation either precedes publication (and the result is dropped) or
    /// follows it (and removes the published snapshot).
    fn complete(&self, identity: IdentityKey, ticket: u64, snapshot: Arc<PermissionSnapshot>) {
        match self.in_flight.entry(identity) {
            Entry::Occupied(entry) if entry.get().ticket == ticket => {
                self.snapshots.insert(identity, snapshot);
                entry.remove();
            }
            _ => debug!(identity = %identity, "discarding superseded snapshot computation"),
        }
    }

    fn release(&self, identity: IdentityKey, ticket: u64) {
        let _ = self
            .in_flight
            .remove_if(&identity, |_, entry| entry.ticket == ticket);
    }
}

/// Removes a registry entry when its computation task ends for any reason.
struct InFlightGuard {
    inner: Arc<SessionCacheInner>,
    identity: IdentityKey,
    ticket: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.release(self.identity, self.ticket);
    }
}

/// Per-process cache of permission snapshots.
///
/// At most one computation per identity is in flight; concurrent loads share
/// the same future. Snapshots are replaced whole, never patched.
#[derive(Clone)]
pub struct PermissionSessionCache {
    inner: Arc<SessionCacheInner>,
}

impl PermissionSessionCache {
    /// Creates an empty cache computing snapshots through `source`.
    #[must_use]
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            inner: Arc::new(SessionCacheInner {
                source,
                snapshots: DashMap::new(),
                in_flight: DashMap::new(),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the materialized snapshot without blocking.
    #[must_use]
    pub fn get_cached(&self, identity: IdentityKey) -> Option<Arc<PermissionSnapshot>> {
        self.inner
            .snapshots
            .get(&identity)
            .map(|entry| entry.value().clone())
    }

    /// Starts a computation, or joins the one already in flight.
    ///
    /// Must be called inside a tokio runtime; the computation runs on the
    /// runtime's worker pool whether or not the returned future is polled.
    #[must_use]
    pub fn load(&self, identity: IdentityKey) -> SnapshotFuture {
        let (future, start) = match self.inner.in_flight.entry(identity) {
            Entry::Occupied(entry) => return entry.get().future.clone(),
            Entry::Vacant(entry) => {
                let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (start, started) = oneshot::channel::<()>();
                let guard = InFlightGuard {
                    inner: self.inner.clone(),
                    identity,
                    ticket,
                };
                let source = self.inner.source.clone();

                let task = tokio::spawn(async move {
                    if started.await.is_err() {
                        return Err(AppError::Internal(format!(
                            "snapshot computation for '{identity}' was never started"
                        )));
                    }

                    let snapshot = Arc::new(source.compute(identity).await?);
                    guard
                        .inner
                        .complete(guard.identity, guard.ticket, snapshot.clone());
                    Ok(snapshot)
                });

                let abort = task.abort_handle();
                let future = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(error) if error.is_cancelled() => Err(AppError::Internal(format!(
                            "snapshot computation for '{identity}' was cancelled"
                        ))),
                        Err(error) => Err(AppError::Internal(format!(
                            "snapshot computation for '{identity}' failed: {error}"
                        ))),
                    }
                }
                .boxed()
                .shared();

                entry.insert(InFlight {
                    ticket,
                    future: future.clone(),
                    abort,
                });
                (future, start)
            }
        };

        // The registry entry exists before the computation may finish.
        let _ = start.send(());
        future
    }

    /// Computes a fresh snapshot, sharing any computation already in flight.
    pub async fn load_async(&self, identity: IdentityKey) -> AppResult<Arc<PermissionSnapshot>> {
        self.load(identity).await
    }

    /// Returns the pending computation, or a ready future for a cached snapshot.
    #[must_use]
    pub fn preloaded(&self, identity: IdentityKey) -> Option<SnapshotFuture> {
        if let Some(entry) = self.inner.in_flight.get(&identity) {
            return Some(entry.future.clone());
        }

        self.get_cached(identity).map(|snapshot| {
            futures::future::ready::<AppResult<_>>(Ok(snapshot))
                .boxed()
                .shared()
        })
    }

    /// Drops the cached snapshot and detaches any in-flight computation.
    ///
    /// A detached computation still completes for its current waiters but is
    /// never published. Returns whether anything was dropped.
    pub fn invalidate(&self, identity: IdentityKey) -> bool {
        let detached = self.inner.in_flight.remove(&identity).is_some();
        let dropped = self.inner.snapshots.remove(&identity).is_some();
        if detached || dropped {
            debug!(identity = %identity, "invalidated permission snapshot");
        }
        detached || dropped
    }

    /// Drops every snapshot and detaches every in-flight computation.
    ///
    /// Returns the identities that were cached or loading.
    pub fn invalidate_all(&self) -> Vec<IdentityKey> {
        let mut identities: Vec<IdentityKey> = self
            .inner
            .in_flight
            .iter()
            .map(|entry| *entry.key())
            .collect();
        self.inner.in_flight.clear();

        identities.extend(self.inner.snapshots.iter().map(|entry| *entry.key()));
        self.inner.snapshots.clear();

        identities.sort_unstable();
        identities.dedup();
        debug!(count = identities.len(), "invalidated all permission snapshots");
        identities
    }

    /// Cancels the in-flight computation for an abandoned connection attempt.
    ///
    /// The registry entry is removed and the computation aborted, so it
    /// publishes nothing.
    pub fn abandon(&self, identity: IdentityKey) -> bool {
        match self.inner.in_flight.remove(&identity) {
            Some((_, in_flight)) => {
                in_flight.abort.abort();
                warn!(identity = %identity, "abandoned snapshot computation");
                true
            }
            None => false,
        }
    }

    /// Returns the number of materialized snapshots.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.inner.snapshots.len()
    }

    /// Returns the number of computations in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }
}

impl PermissionProvider for PermissionSessionCache {
    fn has_permission(&self, identity: IdentityKey, permission: &str) -> bool {
        self.inner
            .snapshots
            .get(&identity)
            .is_some_and(|snapshot| snapshot.has_permission(permission))
    }

    fn snapshot(&self, identity: IdentityKey) -> Option<Arc<PermissionSnapshot>> {
        self.get_cached(identity)
    }
}
