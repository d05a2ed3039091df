//! Document endpoint routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use beaver_sync::wire::{
    CreateDocumentRequest, CreateDocumentResponse, DocumentQuery, ListDocumentsResponse,
    UpdateDocumentRequest,
};

use crate::auth::SessionUser;
use crate::error::Result;
use crate::handlers;
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/documents",
        get(list_handler)
            .post(create_handler)
            .patch(update_handler)
            .delete(delete_handler),
    )
}

/// GET /documents?path= - List a collection.
async fn list_handler(
    State(state): State<AppState>,
    session: SessionUser,
    Query(query): Query<DocumentQuery>,
) -> Result<Json<ListDocumentsResponse>> {
    let documents = handlers::handle_list(&state, &session, &query.path).await?;
    Ok(Json(ListDocumentsResponse { documents }))
}

/// POST /documents - Create a document.
async fn create_handler(
    State(state): State<AppState>,
    session: SessionUser,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreateDocumentResponse>)> {
    let id = handlers::handle_create(&state, &session, request).await?;
    Ok((StatusCode::CREATED, Json(CreateDocumentResponse { id })))
}

/// PATCH /documents - Merge fields into a document.
async fn update_handler(
    State(state): State<AppState>,
    session: SessionUser,
    Json(request): Json<UpdateDocumentRequest>,
) -> Result<StatusCode> {
    handlers::handle_update(&state, &session, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /documents?path=&id= - Remove a document.
async fn delete_handler(
    State(state): State<AppState>,
    session: SessionUser,
    Query(query): Query<DocumentQuery>,
) -> Result<StatusCode> {
    handlers::handle_delete(&state, &session, query).await?;
    Ok(StatusCode::NO_CONTENT)
}
