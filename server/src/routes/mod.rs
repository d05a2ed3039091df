//! HTTP route definitions.

mod auth;
mod documents;
mod health;
mod ws;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(documents::routes())
        .merge(ws::routes())
}
