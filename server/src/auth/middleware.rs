//! Bearer session extraction.
//!
//! Every document and session endpoint requires `Authorization: Bearer <token>`
//! where the token was issued by one of the `/auth` sign-in endpoints.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use beaver_sync::wire::AuthUser;

use crate::db;
use crate::error::AppError;
use crate::AppState;

/// The signed-in principal behind a request.
#[derive(Debug, Clone)]
pub struct SessionUser {
    /// Session token the request was made with
    pub token: String,
    pub user: AuthUser,
}

impl SessionUser {
    /// Resolve a session token against the database.
    pub async fn resolve(state: &AppState, token: &str) -> Result<Self, AppError> {
        match db::find_session_account(&state.pool, token).await? {
            Some(account) => Ok(SessionUser {
                token: token.to_string(),
                user: account.to_user(),
            }),
            None => Err(AppError::Unauthorized("unknown or expired session".into())),
        }
    }
}

/// Extract the bearer token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing authorization header".into()))?;

        let token = bearer_token(header)
            .ok_or_else(|| AppError::Unauthorized("invalid authorization header format".into()))?;

        SessionUser::resolve(state, token).await
    }
}
