//! WebSocket upgrade route.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::auth::SessionUser;
use crate::error::Result;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

/// Query parameters for the socket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token issued by an `/auth` endpoint
    pub token: String,
}

/// Create WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// GET /ws?token= - Upgrade to a watch socket.
///
/// The session is checked before upgrading so a bad token fails with 401.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response> {
    let session = SessionUser::resolve(&state, &query.token).await?;
    Ok(ws.on_upgrade(move |socket| handle_websocket_connection(socket, state, session)))
}
