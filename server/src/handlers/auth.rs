//! Auth handlers - issue and revoke bearer sessions.

use beaver_sync::wire::{AuthResponse, CredentialsRequest, CustomTokenRequest};

use crate::auth::{hash_password, validate_credentials, verify_password, SessionUser};
use crate::db;
use crate::error::{AppError, Result};
use crate::AppState;

use super::{new_id, new_token};

/// Open a session for `uid` and build the response for it.
async fn open_session(state: &AppState, account: &db::StoredAccount) -> Result<AuthResponse> {
    let token = new_token();
    db::insert_session(&state.pool, &token, &account.uid).await?;

    tracing::info!(uid = %account.uid, anonymous = account.anonymous, "Session opened");

    Ok(AuthResponse {
        token,
        user: account.to_user(),
    })
}

/// Create a fresh anonymous account and sign it in.
pub async fn handle_anonymous(state: &AppState) -> Result<AuthResponse> {
    let account = db::StoredAccount {
        uid: new_id(),
        email: None,
        password_hash: None,
        anonymous: true,
    };
    db::insert_account(&state.pool, &account.uid, None, None, true).await?;
    open_session(state, &account).await
}

/// Exchange a provisioned custom token for a session.
pub async fn handle_custom_token(
    state: &AppState,
    request: CustomTokenRequest,
) -> Result<AuthResponse> {
    let token = request.token.trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized("custom token is empty".into()));
    }

    let uid = db::find_custom_token_uid(&state.pool, token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid custom token".into()))?;

    let account = db::ensure_account(&state.pool, &uid).await?;
    open_session(state, &account).await
}

/// Register an email/password account and sign it in.
pub async fn handle_register(
    state: &AppState,
    request: CredentialsRequest,
) -> Result<AuthResponse> {
    validate_credentials(&request.email, &request.password)?;

    let email = request.email.trim().to_lowercase();
    let password_hash = hash_password(&request.password)?;
    let uid = new_id();

    if let Err(e) =
        db::insert_account(&state.pool, &uid, Some(&email), Some(&password_hash), false).await
    {
        if db::is_unique_violation(&e) {
            return Err(AppError::BadRequest("email already registered".into()));
        }
        return Err(e.into());
    }

    let account = db::StoredAccount {
        uid,
        email: Some(email),
        password_hash: Some(password_hash),
        anonymous: false,
    };
    open_session(state, &account).await
}

/// Sign in with email and password.
pub async fn handle_sign_in(state: &AppState, request: CredentialsRequest) -> Result<AuthResponse> {
    let email = request.email.trim().to_lowercase();
    let account = db::find_account_by_email(&state.pool, &email).await?;

    match account {
        Some(account)
            if account
                .password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(&request.password, hash)) =>
        {
            open_session(state, &account).await
        }
        _ => {
            tracing::debug!(email = %email, "Rejected sign-in");
            Err(AppError::Unauthorized("invalid credentials".into()))
        }
    }
}

/// Revoke the caller's session.
pub async fn handle_sign_out(state: &AppState, session: &SessionUser) -> Result<()> {
    db::delete_session(&state.pool, &session.token).await?;
    tracing::info!(uid = %session.user.uid, "Session closed");
    Ok(())
}
