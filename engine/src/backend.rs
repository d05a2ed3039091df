//! The injected backend handle.
//!
//! The sync layer never reaches for ambient client state. Callers build one
//! [`Backend`] at startup and pass it to every component that needs it.

use crate::wire::{AuthUser, DocumentWrite, RawDocument};
use crate::{EntityId, Error, StoragePath};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a backend implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Error::Transient(msg),
            BackendError::NotFound(what) => Error::NotFound(what),
            BackendError::PermissionDenied(msg) | BackendError::Unauthenticated(msg) => {
                Error::Unauthorized(msg)
            }
            BackendError::InvalidArgument(msg) => Error::Invalid(msg),
        }
    }
}

/// A live stream of full collection snapshots.
pub type SnapshotStream = BoxStream<'static, BackendResult<Vec<RawDocument>>>;

/// Session management against the backend's auth service.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// The principal of the session the backend already holds, if any.
    async fn current_user(&self) -> BackendResult<Option<AuthUser>>;

    /// Exchange a pre-provisioned token for a session.
    async fn sign_in_with_custom_token(&self, token: &str) -> BackendResult<AuthUser>;

    /// Create a fresh anonymous session.
    async fn sign_in_anonymously(&self) -> BackendResult<AuthUser>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<AuthUser>;

    async fn register_with_password(&self, email: &str, password: &str)
        -> BackendResult<AuthUser>;

    /// Drop the current session. Succeeds when there is none.
    async fn sign_out(&self) -> BackendResult<()>;
}

/// Document reads, writes and live watches.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Add a document, letting the backend choose its id.
    async fn add(&self, path: &StoragePath, write: DocumentWrite) -> BackendResult<EntityId>;

    /// Merge fields into an existing document. `NotFound` when it is missing.
    async fn update(&self, path: &StoragePath, id: &str, write: DocumentWrite)
        -> BackendResult<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, path: &StoragePath, id: &str) -> BackendResult<()>;

    /// Read the current contents of a collection once.
    async fn list(&self, path: &StoragePath) -> BackendResult<Vec<RawDocument>>;

    /// Open a live watch. The stream yields the initial snapshot followed by
    /// one full snapshot per change, in commit order.
    async fn watch(&self, path: &StoragePath) -> BackendResult<SnapshotStream>;
}

/// Explicitly constructed client handle shared by all sync components.
#[derive(Clone)]
pub struct Backend {
    auth: Arc<dyn AuthBackend>,
    documents: Arc<dyn DocumentStore>,
}

impl Backend {
    /// Start building a backend handle.
    pub fn builder() -> BackendBuilder {
        BackendBuilder::default()
    }

    /// Use one implementation for both auth and documents.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: AuthBackend + DocumentStore + 'static,
    {
        Self {
            auth: backend.clone(),
            documents: backend,
        }
    }

    pub fn auth(&self) -> &Arc<dyn AuthBackend> {
        &self.auth
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

/// Builder for [`Backend`].
#[derive(Default)]
pub struct BackendBuilder {
    auth: Option<Arc<dyn AuthBackend>>,
    documents: Option<Arc<dyn DocumentStore>>,
}

impl BackendBuilder {
    pub fn auth(mut self, auth: Arc<dyn AuthBackend>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Finish the handle. Both halves are required.
    pub fn build(self) -> crate::Result<Backend> {
        let auth = self
            .auth
            .ok_or_else(|| Error::Invalid("backend auth service not configured".into()))?;
        let documents = self
            .documents
            .ok_or_else(|| Error::Invalid("backend document store not configured".into()))?;
        Ok(Backend { auth, documents })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[test]
    fn backend_errors_map_to_taxonomy() {
        assert_eq!(
            Error::from(BackendError::Unavailable("down".into())),
            Error::Transient("down".into())
        );
        assert_eq!(
            Error::from(BackendError::NotFound("X".into())),
            Error::NotFound("X".into())
        );
        assert!(matches!(
            Error::from(BackendError::PermissionDenied("no".into())),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            Error::from(BackendError::Unauthenticated("no".into())),
            Error::Unauthorized(_)
        ));
        assert!(matches!(
            Error::from(BackendError::InvalidArgument("bad".into())),
            Error::Invalid(_)
        ));
    }

    #[test]
    fn builder_requires_both_halves() {
        let memory = Arc::new(MemoryBackend::new());

        let err = Backend::builder().auth(memory.clone()).build().unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let err = Backend::builder()
            .documents(memory.clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        assert!(Backend::builder()
            .auth(memory.clone())
            .documents(memory)
            .build()
            .is_ok());
    }
}
