//! Live collection subscriptions.
//!
//! A subscription delivers the full, normalized contents of one storage path
//! on every backend snapshot. Failures never propagate: they are logged and
//! delivered as an empty list.

use crate::backend::{Backend, DocumentStore};
use crate::entity::{normalize_snapshot, Entity};
use crate::error::Result;
use crate::identity::Identity;
use crate::StoragePath;
use futures::StreamExt;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Callback receiving the full current list of entities at a path.
pub type OnChange = Arc<dyn Fn(Vec<Entity>) + Send + Sync>;

static NEXT_GUARD: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Guard whose callback is running on this thread, 0 when none.
    static DELIVERING: Cell<u64> = const { Cell::new(0) };
}

struct DeliveringMark(u64);

impl DeliveringMark {
    fn enter(id: u64) -> Self {
        let prev = DELIVERING.with(|d| d.replace(id));
        Self(prev)
    }
}

impl Drop for DeliveringMark {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(self.0));
    }
}

/// Serializes deliveries for one subscription and makes revocation
/// synchronous: once [`revoke`](Self::revoke) returns, the callback will not
/// run again.
struct DeliveryGuard {
    id: u64,
    revoked: AtomicBool,
    serial: Mutex<()>,
    on_change: OnChange,
}

impl DeliveryGuard {
    fn new(on_change: OnChange) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_GUARD.fetch_add(1, Ordering::Relaxed),
            revoked: AtomicBool::new(false),
            serial: Mutex::new(()),
            on_change,
        })
    }

    /// Run the callback unless revoked. Returns whether delivery may continue.
    fn deliver(&self, entities: Vec<Entity>) -> bool {
        let _serial = self
            .serial
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.revoked.load(Ordering::SeqCst) {
            return false;
        }
        {
            let _mark = DeliveringMark::enter(self.id);
            (self.on_change)(entities);
        }
        !self.revoked.load(Ordering::SeqCst)
    }

    fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
        // Revoking from inside our own callback: the running delivery is the
        // last one, and waiting on it would deadlock.
        if DELIVERING.with(|d| d.get()) == self.id {
            return;
        }
        // Wait out a delivery that is already in flight.
        drop(
            self.serial
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
    }

    fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}

/// Handle to a live subscription. Dropping it cancels the subscription.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    path: Option<StoragePath>,
    guard: Option<Arc<DeliveryGuard>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// A subscription that was never opened.
    fn inert() -> Self {
        Self {
            path: None,
            guard: None,
            task: None,
        }
    }

    /// Whether snapshots may still be delivered.
    pub fn is_active(&self) -> bool {
        let open = self.guard.as_ref().is_some_and(|g| !g.is_revoked());
        let running = self.task.as_ref().is_some_and(|t| !t.is_finished());
        open && running
    }

    /// Stop deliveries. No callback runs after this returns.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.revoke();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(path) = self.path.take() {
            tracing::debug!(path = %path, "subscription closed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Whether `identity` may read `path` at all. Reads that fail this check are
/// answered locally with an empty list.
fn may_read(identity: &Identity, path: &StoragePath) -> bool {
    identity.is_authenticated() && path.is_owned_by(&identity.id)
}

/// Opens live reads against the document store.
#[derive(Clone)]
pub struct CollectionSync {
    documents: Arc<dyn DocumentStore>,
}

impl CollectionSync {
    pub fn new(backend: &Backend) -> Self {
        Self {
            documents: backend.documents().clone(),
        }
    }

    /// Subscribe to the full contents of `path`.
    ///
    /// The callback receives the initial snapshot and then one full list per
    /// backend change, in backend order and never concurrently. When
    /// `identity` cannot read `path` (degraded or foreign), the callback gets
    /// one empty list before this returns and no backend call is made. A
    /// failed or broken watch also ends with one empty delivery.
    pub async fn subscribe(
        &self,
        identity: &Identity,
        path: &StoragePath,
        on_change: OnChange,
    ) -> Subscription {
        if !may_read(identity, path) {
            tracing::debug!(
                path = %path,
                identity = %identity.id,
                "identity cannot read path, delivering empty list"
            );
            on_change(Vec::new());
            return Subscription::inert();
        }

        let mut stream = match self.documents.watch(path).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to open watch");
                on_change(Vec::new());
                return Subscription::inert();
            }
        };

        let guard = DeliveryGuard::new(on_change);
        let task_guard = guard.clone();
        let task_path = path.clone();
        let task = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(documents) => {
                        let entities = normalize_snapshot(documents);
                        tracing::trace!(path = %task_path, count = entities.len(), "snapshot");
                        if !task_guard.deliver(entities) {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %task_path, error = %e, "watch failed");
                        task_guard.deliver(Vec::new());
                        return;
                    }
                }
            }
            tracing::debug!(path = %task_path, "watch stream ended");
        });

        tracing::debug!(path = %path, "subscription opened");
        Subscription {
            path: Some(path.clone()),
            guard: Some(guard),
            task: Some(task),
        }
    }

    /// Read the current contents of `path` once.
    ///
    /// Identities that cannot read the path get an empty list without a
    /// backend call; backend failures propagate.
    pub async fn fetch(&self, identity: &Identity, path: &StoragePath) -> Result<Vec<Entity>> {
        if !may_read(identity, path) {
            return Ok(Vec::new());
        }
        let documents = self.documents.list(path).await?;
        Ok(normalize_snapshot(documents))
    }
}

impl fmt::Debug for CollectionSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSync").finish_non_exhaustive()
    }
}
