//! Document handlers - list and mutate collections, then notify watchers.
//!
//! Every mutation runs under the path's commit lock and publishes the new
//! snapshot before releasing it, so watchers see snapshots in commit order.

use beaver_sync::clock::format_timestamp;
use beaver_sync::path::validate_document_id;
use beaver_sync::wire::{
    CreateDocumentRequest, DocumentQuery, RawDocument, ServerMessage, UpdateDocumentRequest,
};
use beaver_sync::StoragePath;

use crate::auth::SessionUser;
use crate::db;
use crate::error::{AppError, Result};
use crate::websocket::ConnectionManager;
use crate::AppState;

use super::new_id;

/// Reject access to a path the caller does not own.
pub fn authorize(session: &SessionUser, path: &StoragePath) -> Result<()> {
    if path.is_owned_by(&session.user.uid) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "{} may not access {}",
            session.user.uid, path
        )))
    }
}

/// Push the current contents of `path` to its watchers.
///
/// Must be called while holding the path's commit lock. The mutation has
/// already committed, so a failed read is not reported to the writer.
async fn publish_snapshot(state: &AppState, path: &StoragePath) {
    if state.conn_manager.watcher_count(path) == 0 {
        return;
    }
    let listing = db::list_documents(&state.pool, path).await;
    broadcast_listing(&state.conn_manager, path, listing);
}

/// Send a listing to the watchers of `path`. When the listing could not be
/// read, the watches are closed with an error instead of left stale.
fn broadcast_listing(
    manager: &ConnectionManager,
    path: &StoragePath,
    listing: std::result::Result<Vec<RawDocument>, sqlx::Error>,
) {
    match listing {
        Ok(documents) => {
            manager.publish(path, ServerMessage::snapshot(path.clone(), documents));
        }
        Err(e) => {
            tracing::warn!(path = %path, "Failed to load snapshot after commit: {:?}", e);
            manager.close_watches(path, "failed to load snapshot");
        }
    }
}

/// List every document in a collection.
pub async fn handle_list(
    state: &AppState,
    session: &SessionUser,
    path: &StoragePath,
) -> Result<Vec<RawDocument>> {
    authorize(session, path)?;
    Ok(db::list_documents(&state.pool, path).await?)
}

/// Create a document with a server-assigned id.
pub async fn handle_create(
    state: &AppState,
    session: &SessionUser,
    request: CreateDocumentRequest,
) -> Result<String> {
    let CreateDocumentRequest { path, write } = request;
    authorize(session, &path)?;

    let id = new_id();
    let _guard = state.conn_manager.lock_path(&path).await;
    let committed_at = state.clock.now();
    let fields = write.resolve(&format_timestamp(committed_at));
    db::insert_document(&state.pool, &path, &id, fields, committed_at).await?;
    publish_snapshot(state, &path).await;

    tracing::debug!(path = %path, id = %id, "Document created");
    Ok(id)
}

/// Merge fields into an existing document.
pub async fn handle_update(
    state: &AppState,
    session: &SessionUser,
    request: UpdateDocumentRequest,
) -> Result<()> {
    let UpdateDocumentRequest { path, id, write } = request;
    authorize(session, &path)?;
    validate_document_id(&id)?;

    let _guard = state.conn_manager.lock_path(&path).await;
    let committed_at = state.clock.now();
    let fields = write.resolve(&format_timestamp(committed_at));
    if !db::merge_document(&state.pool, &path, &id, fields, committed_at).await? {
        return Err(AppError::NotFound(format!("document {id}")));
    }
    publish_snapshot(state, &path).await;

    tracing::debug!(path = %path, id = %id, "Document updated");
    Ok(())
}

/// Remove a document. Removing a missing document succeeds.
pub async fn handle_delete(
    state: &AppState,
    session: &SessionUser,
    query: DocumentQuery,
) -> Result<()> {
    let DocumentQuery { path, id } = query;
    authorize(session, &path)?;
    let id = id.ok_or_else(|| AppError::BadRequest("document id is required".into()))?;
    validate_document_id(&id)?;

    let _guard = state.conn_manager.lock_path(&path).await;
    if db::delete_document(&state.pool, &path, &id).await? {
        publish_snapshot(state, &path).await;
        tracing::debug!(path = %path, id = %id, "Document deleted");
    }
    Ok(())
}
