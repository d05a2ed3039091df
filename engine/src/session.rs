//! The session façade.
//!
//! A [`SyncSession`] owns identity resolution, path derivation, every live
//! subscription and every write for one tenant. It moves through
//! [`SessionState`]:
//!
//! ```text
//! Idle -> ResolvingIdentity -> Ready <-> Subscribed
//!   \_____________________________\________\______-> TornDown
//! ```
//!
//! Subscriptions are keyed by collection. Subscribing again to the same
//! collection tears the previous one down first, and an identity change
//! rebinds every subscription to the new identity's path before any further
//! delivery.

use crate::backend::Backend;
use crate::collection::{CollectionSync, OnChange, Subscription};
use crate::config::SyncConfig;
use crate::entity::Entity;
use crate::error::Result;
use crate::gateway::MutationGateway;
use crate::identity::{Identity, IdentityResolver, DEFAULT_RESOLVE_TIMEOUT};
use crate::model::Document;
use crate::path::{resolve_path, DEFAULT_TENANT};
use crate::{CollectionName, EntityId, Error, StoragePath, TenantId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Lifecycle of a [`SyncSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, identity not yet requested
    Idle,
    /// Waiting for identity resolution to settle
    ResolvingIdentity,
    /// Identity known, no live subscriptions
    Ready,
    /// At least one live subscription
    Subscribed,
    /// Ended; every operation fails with [`Error::SessionClosed`]
    TornDown,
}

/// One live subscription slot.
struct Slot {
    /// Stable id of the logical subscription, handed out in [`Unsubscribe`]
    ticket: u64,
    /// Id of the current backend binding; changes on every rebind
    binding: u64,
    on_change: OnChange,
    subscription: Option<Subscription>,
}

struct Core {
    state: SessionState,
    tenant: TenantId,
    identity: Option<Identity>,
    slots: HashMap<CollectionName, Slot>,
    next_id: u64,
}

impl Core {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::TornDown {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn settle_state(&mut self) {
        if self.state == SessionState::TornDown {
            return;
        }
        self.state = if !self.slots.is_empty() {
            SessionState::Subscribed
        } else if self.identity.is_some() {
            SessionState::Ready
        } else {
            self.state
        };
    }

    fn is_current(&self, collection: &str, binding: u64) -> bool {
        self.state != SessionState::TornDown
            && self
                .slots
                .get(collection)
                .is_some_and(|slot| slot.binding == binding)
    }
}

struct Inner {
    resolver: IdentityResolver,
    collections: CollectionSync,
    gateway: MutationGateway,
    core: Mutex<Core>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wrap a caller callback so it only fires while `binding` is the live
/// binding of `collection`.
fn gated(inner: &Arc<Inner>, collection: &str, binding: u64, on_change: OnChange) -> OnChange {
    let weak = Arc::downgrade(inner);
    let collection = collection.to_string();
    Arc::new(move |entities: Vec<Entity>| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let current = inner.lock().is_current(&collection, binding);
        if current {
            on_change(entities);
        }
    })
}

/// Authenticated, tenant-scoped access to synchronized collections.
///
/// Dropping the session ends it.
pub struct SyncSession {
    inner: Arc<Inner>,
}

impl SyncSession {
    /// Start building a session.
    pub fn builder() -> SyncSessionBuilder {
        SyncSessionBuilder::default()
    }

    /// A session on `backend` for the default tenant.
    pub fn new(backend: Backend) -> Self {
        SyncSessionBuilder::default().build_with(backend)
    }

    /// A session on `backend` configured from `config`.
    pub fn from_config(backend: Backend, config: &SyncConfig) -> Self {
        Self::builder()
            .tenant(config.tenant_id.clone())
            .initial_auth_token(config.initial_auth_token.clone())
            .identity_timeout(config.identity_timeout)
            .build_with(backend)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Tenant paths are scoped to.
    pub fn tenant(&self) -> TenantId {
        self.inner.lock().tenant.clone()
    }

    /// The identity the session is acting as, if resolution has settled.
    /// Never contacts the backend.
    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.lock().identity.clone()
    }

    /// Begin the session for `tenant_id` and resolve its identity.
    ///
    /// A blank tenant selects the default tenant. Restarting with a different
    /// tenant rebinds live subscriptions.
    pub async fn start(&self, tenant_id: &str) -> Result<Identity> {
        let tenant = match tenant_id.trim() {
            "" => DEFAULT_TENANT.to_string(),
            t => t.to_string(),
        };
        let changed = {
            let mut core = self.inner.lock();
            core.ensure_open()?;
            let changed = core.tenant != tenant;
            core.tenant = tenant;
            changed
        };

        let identity = self.ensure_identity().await?;
        if changed {
            self.rebind(&identity).await;
        }
        tracing::info!(tenant = %self.tenant(), identity = %identity.id, "sync session started");
        Ok(identity)
    }

    /// Resolve the identity, suspending until resolution settles. Concurrent
    /// callers share one resolution.
    async fn ensure_identity(&self) -> Result<Identity> {
        {
            let mut core = self.inner.lock();
            core.ensure_open()?;
            if let Some(identity) = &core.identity {
                return Ok(identity.clone());
            }
            core.state = SessionState::ResolvingIdentity;
        }

        let identity = self.inner.resolver.resolve().await;

        let mut core = self.inner.lock();
        core.ensure_open()?;
        if core.identity.is_none() {
            core.identity = Some(identity);
        }
        core.settle_state();
        core.identity.clone().ok_or(Error::SessionClosed)
    }

    /// Make `identity` current and rebind subscriptions when it changed.
    async fn adopt(&self, identity: Identity) -> Result<Identity> {
        let changed = {
            let mut core = self.inner.lock();
            core.ensure_open()?;
            let changed = core.identity.as_ref() != Some(&identity);
            core.identity = Some(identity.clone());
            core.settle_state();
            changed
        };
        if changed {
            tracing::info!(identity = %identity.id, kind = ?identity.kind, "identity changed");
            self.rebind(&identity).await;
        }
        Ok(identity)
    }

    /// Tear down every live subscription and reopen it against the path of
    /// `identity`.
    async fn rebind(&self, identity: &Identity) {
        let (tenant, targets, retired) = {
            let mut core = self.inner.lock();
            if core.state == SessionState::TornDown {
                return;
            }
            let collections: Vec<CollectionName> = core.slots.keys().cloned().collect();
            let mut targets = Vec::with_capacity(collections.len());
            let mut retired = Vec::with_capacity(collections.len());
            for collection in collections {
                let binding = core.issue_id();
                if let Some(slot) = core.slots.get_mut(&collection) {
                    slot.binding = binding;
                    retired.extend(slot.subscription.take());
                    targets.push((collection, binding, slot.on_change.clone()));
                }
            }
            (core.tenant.clone(), targets, retired)
        };
        // Old bindings are already gated off; dropping them waits out any
        // delivery still in flight.
        drop(retired);

        for (collection, binding, on_change) in targets {
            let path = match resolve_path(&tenant, identity, &collection) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(collection = %collection, error = %e, "cannot rebind subscription");
                    gated(&self.inner, &collection, binding, on_change)(Vec::new());
                    continue;
                }
            };
            tracing::debug!(collection = %collection, path = %path, "rebinding subscription");
            let callback = gated(&self.inner, &collection, binding, on_change);
            let subscription = self
                .inner
                .collections
                .subscribe(identity, &path, callback)
                .await;
            self.install(&collection, binding, subscription);
        }
    }

    /// Store `subscription` in its slot if `binding` is still current;
    /// otherwise drop it outside the lock.
    fn install(&self, collection: &str, binding: u64, subscription: Subscription) {
        let stale = {
            let mut core = self.inner.lock();
            let current = core.is_current(collection, binding);
            match core.slots.get_mut(collection) {
                Some(slot) if current => {
                    slot.subscription = Some(subscription);
                    None
                }
                _ => Some(subscription),
            }
        };
        drop(stale);
    }

    async fn target(&self, collection: &str) -> Result<(Identity, StoragePath)> {
        let identity = self.ensure_identity().await?;
        let tenant = self.inner.lock().tenant.clone();
        let path = resolve_path(&tenant, &identity, collection)?;
        Ok((identity, path))
    }

    /// Storage path of `collection` for the current identity.
    pub async fn path_for(&self, collection: &str) -> Result<StoragePath> {
        self.target(collection).await.map(|(_, path)| path)
    }

    /// Subscribe to the full contents of `collection`.
    ///
    /// Any earlier subscription to the same collection is torn down first,
    /// including one whose setup is still in flight. The returned handle
    /// removes this subscription; it does nothing once the subscription has
    /// been superseded. Dropping the handle leaves the subscription running
    /// until the session ends.
    pub async fn subscribe(&self, collection: &str, on_change: OnChange) -> Result<Unsubscribe> {
        let (identity, path) = self.target(collection).await?;

        let (ticket, binding, previous) = {
            let mut core = self.inner.lock();
            core.ensure_open()?;
            let ticket = core.issue_id();
            let binding = core.issue_id();
            let previous = core.slots.insert(
                collection.to_string(),
                Slot {
                    ticket,
                    binding,
                    on_change: on_change.clone(),
                    subscription: None,
                },
            );
            core.settle_state();
            (ticket, binding, previous)
        };
        if previous.is_some() {
            tracing::debug!(collection, "superseding previous subscription");
        }
        drop(previous);

        let callback = gated(&self.inner, collection, binding, on_change);
        let subscription = self
            .inner
            .collections
            .subscribe(&identity, &path, callback)
            .await;
        self.install(collection, binding, subscription);

        Ok(Unsubscribe {
            inner: Arc::downgrade(&self.inner),
            collection: collection.to_string(),
            ticket,
        })
    }

    /// Read the current contents of `collection` once.
    pub async fn fetch(&self, collection: &str) -> Result<Vec<Entity>> {
        let (identity, path) = self.target(collection).await?;
        self.inner.collections.fetch(&identity, &path).await
    }

    /// Create an entity in `collection`, returning its id.
    pub async fn create(&self, collection: &str, data: Value) -> Result<EntityId> {
        let (identity, path) = self.target(collection).await?;
        self.inner.gateway.create(&identity, &path, data).await
    }

    /// Merge `data` into entity `id` of `collection`.
    pub async fn update(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        let (identity, path) = self.target(collection).await?;
        self.inner.gateway.update(&identity, &path, id, data).await
    }

    /// Delete entity `id` of `collection`. Idempotent.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let (identity, path) = self.target(collection).await?;
        self.inner.gateway.delete(&identity, &path, id).await
    }

    /// Validate and create a typed record in its collection.
    pub async fn insert<T: Document>(&self, record: &T) -> Result<EntityId> {
        record.validate()?;
        self.create(T::COLLECTION, to_value(record)?).await
    }

    /// Validate and overwrite the fields of typed record `id`.
    pub async fn replace<T: Document>(&self, id: &str, record: &T) -> Result<()> {
        record.validate()?;
        self.update(T::COLLECTION, id, to_value(record)?).await
    }

    /// Sign in with an email account and rebind subscriptions to it.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity> {
        self.inner.lock().ensure_open()?;
        let identity = self
            .inner
            .resolver
            .sign_in_with_password(email, password)
            .await?;
        self.adopt(identity).await
    }

    /// Register an email account and rebind subscriptions to it.
    pub async fn register_with_password(&self, email: &str, password: &str) -> Result<Identity> {
        self.inner.lock().ensure_open()?;
        let identity = self
            .inner
            .resolver
            .register_with_password(email, password)
            .await?;
        self.adopt(identity).await
    }

    /// Sign out, then resolve a fresh identity and rebind subscriptions to it.
    pub async fn sign_out(&self) -> Result<Identity> {
        self.inner.lock().ensure_open()?;
        self.inner.resolver.sign_out().await?;
        let identity = self.inner.resolver.resolve().await;
        self.adopt(identity).await
    }

    /// Discard the memoized identity and resolve again, rebinding
    /// subscriptions when the result differs.
    pub async fn refresh_identity(&self) -> Result<Identity> {
        self.inner.lock().ensure_open()?;
        self.inner.resolver.invalidate().await;
        let identity = self.inner.resolver.resolve().await;
        self.adopt(identity).await
    }

    /// End the session. Every subscription is unregistered before this
    /// returns; no callback runs afterwards. Calling it again has no effect.
    pub fn end(&self) {
        let slots = {
            let mut core = self.inner.lock();
            if core.state == SessionState::TornDown {
                return;
            }
            core.state = SessionState::TornDown;
            std::mem::take(&mut core.slots)
        };
        let count = slots.len();
        drop(slots);
        tracing::info!(subscriptions = count, "sync session ended");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.lock();
        f.debug_struct("SyncSession")
            .field("state", &core.state)
            .field("tenant", &core.tenant)
            .field("identity", &core.identity)
            .field("subscriptions", &core.slots.len())
            .finish()
    }
}

fn to_value<T: Document>(record: &T) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| Error::Invalid(e.to_string()))
}

/// Handle returned by [`SyncSession::subscribe`].
#[must_use = "keep the handle to end the subscription"]
pub struct Unsubscribe {
    inner: Weak<Inner>,
    collection: CollectionName,
    ticket: u64,
}

impl Unsubscribe {
    /// Collection this handle subscribes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether this subscription is still owned by its session.
    pub fn is_active(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| {
            let core = inner.lock();
            core.state != SessionState::TornDown
                && core
                    .slots
                    .get(&self.collection)
                    .is_some_and(|slot| slot.ticket == self.ticket)
        })
    }

    /// Remove the subscription. No callback runs after this returns.
    pub fn unsubscribe(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = {
            let mut core = inner.lock();
            let owned = core
                .slots
                .get(&self.collection)
                .is_some_and(|slot| slot.ticket == self.ticket);
            let removed = if owned {
                core.slots.remove(&self.collection)
            } else {
                None
            };
            core.settle_state();
            removed
        };
        if removed.is_some() {
            tracing::debug!(collection = %self.collection, "unsubscribed");
        }
        drop(removed);
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SyncSession`].
#[derive(Debug)]
pub struct SyncSessionBuilder {
    backend: Option<Backend>,
    tenant: TenantId,
    initial_auth_token: Option<String>,
    identity_timeout: Duration,
}

impl Default for SyncSessionBuilder {
    fn default() -> Self {
        Self {
            backend: None,
            tenant: DEFAULT_TENANT.to_string(),
            initial_auth_token: None,
            identity_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

impl SyncSessionBuilder {
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Tenant used until [`SyncSession::start`] names another.
    pub fn tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        let tenant = tenant.into();
        self.tenant = if tenant.trim().is_empty() {
            DEFAULT_TENANT.to_string()
        } else {
            tenant
        };
        self
    }

    pub fn initial_auth_token(mut self, token: Option<String>) -> Self {
        self.initial_auth_token = token;
        self
    }

    pub fn identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Finish the session. A backend is required.
    pub fn build(mut self) -> Result<SyncSession> {
        let backend = self
            .backend
            .take()
            .ok_or_else(|| Error::Invalid("sync session needs a backend".into()))?;
        Ok(self.build_with(backend))
    }

    fn build_with(self, backend: Backend) -> SyncSession {
        let resolver = IdentityResolver::new(backend.auth().clone())
            .with_initial_auth_token(self.initial_auth_token)
            .with_timeout(self.identity_timeout);
        SyncSession {
            inner: Arc::new(Inner {
                resolver,
                collections: CollectionSync::new(&backend),
                gateway: MutationGateway::new(&backend),
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    tenant: self.tenant,
                    identity: None,
                    slots: HashMap::new(),
                    next_id: 0,
                }),
            }),
        }
    }
}
