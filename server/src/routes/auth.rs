//! Auth endpoint routes.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use beaver_sync::wire::{AuthResponse, AuthUser, CredentialsRequest, CustomTokenRequest};

use crate::auth::SessionUser;
use crate::error::Result;
use crate::handlers;
use crate::AppState;

/// Create auth routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/anonymous", post(anonymous_handler))
        .route("/auth/custom-token", post(custom_token_handler))
        .route("/auth/register", post(register_handler))
        .route("/auth/sign-in", post(sign_in_handler))
        .route("/auth/sign-out", post(sign_out_handler))
        .route("/auth/me", get(me_handler))
}

/// POST /auth/anonymous - Sign in as a fresh anonymous principal.
async fn anonymous_handler(State(state): State<AppState>) -> Result<Json<AuthResponse>> {
    Ok(Json(handlers::handle_anonymous(&state).await?))
}

/// POST /auth/custom-token - Exchange a custom token for a session.
async fn custom_token_handler(
    State(state): State<AppState>,
    Json(request): Json<CustomTokenRequest>,
) -> Result<Json<AuthResponse>> {
    Ok(Json(handlers::handle_custom_token(&state, request).await?))
}

/// POST /auth/register - Create an email/password account.
async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>> {
    Ok(Json(handlers::handle_register(&state, request).await?))
}

/// POST /auth/sign-in - Sign in with email and password.
async fn sign_in_handler(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>> {
    Ok(Json(handlers::handle_sign_in(&state, request).await?))
}

/// POST /auth/sign-out - Revoke the current session.
async fn sign_out_handler(
    State(state): State<AppState>,
    session: SessionUser,
) -> Result<StatusCode> {
    handlers::handle_sign_out(&state, &session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me - The principal behind the current session.
async fn me_handler(session: SessionUser) -> Json<AuthUser> {
    Json(session.user)
}
