//! Writes against a collection.
//!
//! The gateway performs exactly one backend write per call and never patches
//! local state; callers observe the result through their subscription.

use crate::backend::{Backend, DocumentStore};
use crate::entity::{writable_fields, CREATED_AT, LAST_UPDATED};
use crate::error::Result;
use crate::identity::Identity;
use crate::path::validate_document_id;
use crate::wire::DocumentWrite;
use crate::{EntityId, Error, StoragePath};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Create, update and delete entities on behalf of an identity.
#[derive(Clone)]
pub struct MutationGateway {
    documents: Arc<dyn DocumentStore>,
}

impl MutationGateway {
    pub fn new(backend: &Backend) -> Self {
        Self {
            documents: backend.documents().clone(),
        }
    }

    fn authorize(identity: &Identity, path: &StoragePath) -> Result<()> {
        if !identity.is_authenticated() {
            return Err(Error::Unauthorized(format!(
                "identity {} is not signed in",
                identity.id
            )));
        }
        if !path.is_owned_by(&identity.id) {
            return Err(Error::Unauthorized(format!(
                "identity {} does not own {path}",
                identity.id
            )));
        }
        Ok(())
    }

    /// Add an entity and return its backend-assigned id.
    ///
    /// `createdAt` and `lastUpdated` are both stamped by the backend with the
    /// same commit time. Any `id` or timestamp in `data` is ignored.
    pub async fn create(
        &self,
        identity: &Identity,
        path: &StoragePath,
        data: Value,
    ) -> Result<EntityId> {
        Self::authorize(identity, path)?;
        let write = DocumentWrite::new(writable_fields(data)?)
            .stamp(CREATED_AT)
            .stamp(LAST_UPDATED);

        let id = self.documents.add(path, write).await.map_err(|e| {
            tracing::warn!(path = %path, error = %e, "create failed");
            Error::from(e)
        })?;
        tracing::debug!(path = %path, id = %id, "entity created");
        Ok(id)
    }

    /// Merge `data` into an existing entity and restamp `lastUpdated`.
    ///
    /// Fails with [`Error::NotFound`] when `id` does not exist at `path`.
    pub async fn update(
        &self,
        identity: &Identity,
        path: &StoragePath,
        id: &str,
        data: Value,
    ) -> Result<()> {
        Self::authorize(identity, path)?;
        validate_document_id(id)?;
        let write = DocumentWrite::new(writable_fields(data)?).stamp(LAST_UPDATED);

        self.documents.update(path, id, write).await.map_err(|e| {
            tracing::warn!(path = %path, id, error = %e, "update failed");
            Error::from(e)
        })?;
        tracing::debug!(path = %path, id, "entity updated");
        Ok(())
    }

    /// Remove an entity. Removing one that does not exist succeeds.
    ///
    /// A malformed id still fails with [`Error::Invalid`]: it names no
    /// document that could exist, so the call is rejected before reaching the
    /// backend.
    pub async fn delete(&self, identity: &Identity, path: &StoragePath, id: &str) -> Result<()> {
        Self::authorize(identity, path)?;
        validate_document_id(id)?;

        match self.documents.delete(path, id).await.map_err(Error::from) {
            Ok(()) | Err(Error::NotFound(_)) => {
                tracing::debug!(path = %path, id, "entity deleted");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %path, id, error = %e, "delete failed");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for MutationGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationGateway").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AuthBackend;
    use crate::clock::parse_timestamp;
    use crate::memory::MemoryBackend;
    use crate::path::resolve_path;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryBackend>, MutationGateway, Identity, StoragePath) {
        let memory = Arc::new(MemoryBackend::new());
        let identity: Identity = memory.sign_in_anonymously().await.unwrap().into();
        let path = resolve_path("acme", &identity, "products").unwrap();
        let gateway = MutationGateway::new(&Backend::from_shared(memory.clone()));
        (memory, gateway, identity, path)
    }

    #[tokio::test]
    async fn create_strips_client_managed_fields() {
        let (memory, gateway, identity, path) = setup().await;
        let id = gateway
            .create(
                &identity,
                &path,
                json!({"id": "mine", "createdAt": "1999-01-01", "name": "Widget"}),
            )
            .await
            .unwrap();

        assert_ne!(id, "mine");
        let stored = memory.document(&path, &id).unwrap();
        assert!(stored.get("id").is_none());
        assert_ne!(stored["createdAt"], json!("1999-01-01"));
        assert_eq!(stored["createdAt"], stored["lastUpdated"]);
    }

    #[tokio::test]
    async fn update_keeps_created_at() {
        let (memory, gateway, identity, path) = setup().await;
        let id = gateway
            .create(&identity, &path, json!({"price": 1}))
            .await
            .unwrap();
        let created = memory.document(&path, &id).unwrap()["createdAt"].clone();

        gateway
            .update(&identity, &path, &id, json!({"price": 2}))
            .await
            .unwrap();

        let stored = memory.document(&path, &id).unwrap();
        assert_eq!(stored["createdAt"], created);
        assert!(parse_timestamp(&stored["lastUpdated"]) > parse_timestamp(&created));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (_, gateway, identity, path) = setup().await;
        let err = gateway
            .update(&identity, &path, "nope", json!({"price": 2}))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_, gateway, identity, path) = setup().await;
        let id = gateway
            .create(&identity, &path, json!({"name": "W"}))
            .await
            .unwrap();
        gateway.delete(&identity, &path, &id).await.unwrap();
        gateway.delete(&identity, &path, &id).await.unwrap();
    }

    #[tokio::test]
    async fn degraded_identity_is_unauthorized() {
        let (memory, gateway, _, _) = setup().await;
        let degraded = Identity::degraded();
        let path = resolve_path("acme", &degraded, "products").unwrap();
        let calls = memory.calls();

        let err = gateway
            .create(&degraded, &path, json!({"name": "W"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(memory.calls(), calls);
    }

    #[tokio::test]
    async fn foreign_path_is_unauthorized() {
        let (_, gateway, identity, _) = setup().await;
        let other = resolve_path("acme", &Identity::registered("other"), "products").unwrap();
        let err = gateway
            .delete(&identity, &other, "X")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn offline_is_transient() {
        let (memory, gateway, identity, path) = setup().await;
        memory.set_offline(true);
        let err = gateway
            .create(&identity, &path, json!({"name": "W"}))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rejects_bad_payload_and_id() {
        let (_, gateway, identity, path) = setup().await;
        assert!(matches!(
            gateway.create(&identity, &path, json!("text")).await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            gateway.update(&identity, &path, "a/b", json!({})).await,
            Err(Error::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn delete_malformed_id_is_invalid() {
        let (memory, gateway, identity, path) = setup().await;
        let calls = memory.calls();
        let err = gateway
            .delete(&identity, &path, "no.such id")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
        assert_eq!(memory.calls(), calls);
    }
}
