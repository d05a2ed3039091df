//! In-process backend.
//!
//! Implements both [`AuthBackend`] and [`DocumentStore`] with the same rules a
//! hosted backend enforces: a path is readable and writable only by the
//! principal named in its identity segment, timestamps come from the backend
//! clock, and every commit pushes a full snapshot to the path's watchers.
//! Used for tests, demos and offline development.

use crate::backend::{AuthBackend, BackendError, BackendResult, DocumentStore, SnapshotStream};
use crate::clock::{format_timestamp, ServerClock};
use crate::wire::{AuthUser, DocumentWrite, RawDocument, MIN_PASSWORD_LENGTH};
use crate::{EntityId, StoragePath};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

type Watcher = mpsc::UnboundedSender<BackendResult<Vec<RawDocument>>>;

#[derive(Debug)]
struct Account {
    uid: String,
    password: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<StoragePath, BTreeMap<EntityId, Map<String, Value>>>,
    watchers: HashMap<StoragePath, Vec<Watcher>>,
    session: Option<AuthUser>,
    accounts: HashMap<String, Account>,
    custom_tokens: HashMap<String, String>,
}

impl MemoryState {
    fn authorize(&self, path: &StoragePath) -> BackendResult<()> {
        let user = self
            .session
            .as_ref()
            .ok_or_else(|| BackendError::Unauthenticated("no active session".into()))?;
        if !path.is_owned_by(&user.uid) {
            return Err(BackendError::PermissionDenied(format!(
                "{} may not access {path}",
                user.uid
            )));
        }
        Ok(())
    }

    fn snapshot(&self, path: &StoragePath) -> Vec<RawDocument> {
        self.collections
            .get(path)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| RawDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn publish(&mut self, path: &StoragePath) {
        let snapshot = self.snapshot(path);
        if let Some(watchers) = self.watchers.get_mut(path) {
            watchers.retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
        }
    }
}

/// A complete backend living in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    clock: ServerClock,
    offline: AtomicBool,
    calls: AtomicU64,
    anonymous_sign_ins: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Every trait call counts as one network round trip.
    fn begin(&self) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    fn new_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        id.get(..20).unwrap_or(&id).to_string()
    }

    fn open_session(&self, user: AuthUser) -> AuthUser {
        self.lock().session = Some(user.clone());
        user
    }

    /// Make every subsequent call fail with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of trait calls received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of anonymous sessions created so far.
    pub fn anonymous_sign_ins(&self) -> u64 {
        self.anonymous_sign_ins.load(Ordering::SeqCst)
    }

    /// Register a token that [`AuthBackend::sign_in_with_custom_token`] will
    /// exchange for `uid`.
    pub fn provision_custom_token(&self, token: impl Into<String>, uid: impl Into<String>) {
        self.lock().custom_tokens.insert(token.into(), uid.into());
    }

    /// Store a document verbatim, bypassing access rules and timestamping.
    pub fn seed(&self, path: &StoragePath, id: impl Into<EntityId>, fields: Map<String, Value>) {
        let mut state = self.lock();
        state
            .collections
            .entry(path.clone())
            .or_default()
            .insert(id.into(), fields);
        state.publish(path);
    }

    /// Stored fields of one document.
    pub fn document(&self, path: &StoragePath, id: &str) -> Option<Map<String, Value>> {
        self.lock()
            .collections
            .get(path)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Terminate every watch on `path` with an error.
    pub fn fail_watchers(&self, path: &StoragePath, message: &str) {
        if let Some(watchers) = self.lock().watchers.remove(path) {
            for tx in watchers {
                let _ = tx.send(Err(BackendError::Unavailable(message.to_string())));
            }
        }
    }

    /// Number of watches on `path` whose receiver is still alive.
    pub fn watcher_count(&self, path: &StoragePath) -> usize {
        let mut state = self.lock();
        match state.watchers.get_mut(path) {
            Some(watchers) => {
                watchers.retain(|tx| !tx.is_closed());
                watchers.len()
            }
            None => 0,
        }
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
        self.begin()?;
        Ok(self.lock().session.clone())
    }

    async fn sign_in_with_custom_token(&self, token: &str) -> BackendResult<AuthUser> {
        self.begin()?;
        let uid = self
            .lock()
            .custom_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| BackendError::Unauthenticated("unknown custom token".into()))?;
        Ok(self.open_session(AuthUser {
            uid,
            anonymous: false,
            email: None,
        }))
    }

    async fn sign_in_anonymously(&self) -> BackendResult<AuthUser> {
        self.begin()?;
        self.anonymous_sign_ins.fetch_add(1, Ordering::SeqCst);
        Ok(self.open_session(AuthUser {
            uid: Self::new_id(),
            anonymous: true,
            email: None,
        }))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<AuthUser> {
        self.begin()?;
        let uid = {
            let state = self.lock();
            match state.accounts.get(email) {
                Some(account) if account.password == password => account.uid.clone(),
                _ => return Err(BackendError::Unauthenticated("invalid credentials".into())),
            }
        };
        Ok(self.open_session(AuthUser {
            uid,
            anonymous: false,
            email: Some(email.to_string()),
        }))
    }

    async fn register_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthUser> {
        self.begin()?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(BackendError::InvalidArgument(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        let uid = Self::new_id();
        {
            let mut state = self.lock();
            if state.accounts.contains_key(email) {
                return Err(BackendError::InvalidArgument(
                    "email already registered".into(),
                ));
            }
            state.accounts.insert(
                email.to_string(),
                Account {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );
        }
        Ok(self.open_session(AuthUser {
            uid,
            anonymous: false,
            email: Some(email.to_string()),
        }))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.begin()?;
        self.lock().session = None;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn add(&self, path: &StoragePath, write: DocumentWrite) -> BackendResult<EntityId> {
        self.begin()?;
        let mut state = self.lock();
        state.authorize(path)?;

        let id = Self::new_id();
        let fields = write.resolve(&format_timestamp(self.clock.now()));
        state
            .collections
            .entry(path.clone())
            .or_default()
            .insert(id.clone(), fields);
        state.publish(path);
        Ok(id)
    }

    async fn update(
        &self,
        path: &StoragePath,
        id: &str,
        write: DocumentWrite,
    ) -> BackendResult<()> {
        self.begin()?;
        let mut state = self.lock();
        state.authorize(path)?;

        let commit_time = format_timestamp(self.clock.now());
        let stored = state
            .collections
            .get_mut(path)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        stored.extend(write.resolve(&commit_time));
        state.publish(path);
        Ok(())
    }

    async fn delete(&self, path: &StoragePath, id: &str) -> BackendResult<()> {
        self.begin()?;
        let mut state = self.lock();
        state.authorize(path)?;

        let removed = state
            .collections
            .get_mut(path)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            state.publish(path);
        }
        Ok(())
    }

    async fn list(&self, path: &StoragePath) -> BackendResult<Vec<RawDocument>> {
        self.begin()?;
        let state = self.lock();
        state.authorize(path)?;
        Ok(state.snapshot(path))
    }

    async fn watch(&self, path: &StoragePath) -> BackendResult<SnapshotStream> {
        self.begin()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            state.authorize(path)?;
            // Initial snapshot is queued under the same lock as later commits.
            let _ = tx.send(Ok(state.snapshot(path)));
            state.watchers.entry(path.clone()).or_default().push(tx);
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_timestamp;
    use crate::identity::Identity;
    use crate::path::resolve_path;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn signed_in() -> (MemoryBackend, StoragePath) {
        let backend = MemoryBackend::new();
        let user = backend.sign_in_anonymously().await.unwrap();
        let path = resolve_path("acme", &Identity::anonymous(user.uid), "products").unwrap();
        (backend, path)
    }

    #[tokio::test]
    async fn add_stamps_server_time() {
        let (backend, path) = signed_in().await;
        let write = DocumentWrite::new(fields(json!({"name": "Widget"})))
            .stamp("createdAt")
            .stamp("lastUpdated");

        let id = backend.add(&path, write).await.unwrap();
        let stored = backend.document(&path, &id).unwrap();
        assert_eq!(stored["name"], json!("Widget"));
        assert!(parse_timestamp(&stored["createdAt"]).is_some());
        assert_eq!(stored["createdAt"], stored["lastUpdated"]);
    }

    #[tokio::test]
    async fn update_merges_and_advances_clock() {
        let (backend, path) = signed_in().await;
        let id = backend
            .add(
                &path,
                DocumentWrite::new(fields(json!({"name": "Widget", "price": 1})))
                    .stamp("lastUpdated"),
            )
            .await
            .unwrap();
        let before = parse_timestamp(&backend.document(&path, &id).unwrap()["lastUpdated"]);

        backend
            .update(
                &path,
                &id,
                DocumentWrite::new(fields(json!({"price": 2}))).stamp("lastUpdated"),
            )
            .await
            .unwrap();

        let stored = backend.document(&path, &id).unwrap();
        assert_eq!(stored["name"], json!("Widget"));
        assert_eq!(stored["price"], json!(2));
        assert!(parse_timestamp(&stored["lastUpdated"]) > before);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (backend, path) = signed_in().await;
        let err = backend
            .update(&path, "missing", DocumentWrite::default())
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::NotFound("missing".into()));
    }

    #[tokio::test]
    async fn delete_missing_succeeds() {
        let (backend, path) = signed_in().await;
        assert!(backend.delete(&path, "missing").await.is_ok());
    }

    #[tokio::test]
    async fn foreign_path_is_denied() {
        let (backend, _) = signed_in().await;
        let other = resolve_path("acme", &Identity::registered("someone"), "products").unwrap();
        let err = backend.list(&other).await.unwrap_err();
        assert!(matches!(err, BackendError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn signed_out_is_unauthenticated() {
        let backend = MemoryBackend::new();
        let path = resolve_path("acme", &Identity::registered("u1"), "products").unwrap();
        let err = backend.watch(&path).await.err().unwrap();
        assert!(matches!(err, BackendError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn watch_streams_snapshots_in_order() {
        let (backend, path) = signed_in().await;
        let mut stream = backend.watch(&path).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().len(), 0);

        let id = backend
            .add(&path, DocumentWrite::new(fields(json!({"n": 1}))))
            .await
            .unwrap();
        let snapshot = stream.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);

        backend.delete(&path, &id).await.unwrap();
        assert!(stream.next().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_watch_is_pruned() {
        let (backend, path) = signed_in().await;
        let stream = backend.watch(&path).await.unwrap();
        assert_eq!(backend.watcher_count(&path), 1);
        drop(stream);
        assert_eq!(backend.watcher_count(&path), 0);
    }

    #[tokio::test]
    async fn offline_fails_everything() {
        let (backend, path) = signed_in().await;
        backend.set_offline(true);
        assert!(matches!(
            backend.list(&path).await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            backend.current_user().await,
            Err(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_short_passwords() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.register_with_password("a@b.c", "short").await,
            Err(BackendError::InvalidArgument(_))
        ));
        backend
            .register_with_password("a@b.c", "password1")
            .await
            .unwrap();
        assert!(matches!(
            backend.register_with_password("a@b.c", "password2").await,
            Err(BackendError::InvalidArgument(_))
        ));
    }
}
