//! WebSocket handler for live collection watches.
//!
//! Handles WebSocket connections, registering and dropping watches as the
//! client asks and forwarding published snapshots.

use axum::extract::ws::{Message, WebSocket};
use beaver_sync::StoragePath;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::auth::SessionUser;
use crate::db;
use crate::websocket::{ClientMessage, ServerMessage};
use crate::AppState;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState, session: SessionUser) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_manager = state.conn_manager.clone();
    let uid = session.user.uid.clone();
    let conn_id = conn_manager.register(uid.clone(), tx);

    tracing::info!(conn_id = %conn_id, uid = %uid, "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(response) = process_message(&text, &state, &conn_id, &session).await {
                    conn_manager.send_to(&conn_id, response);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        uid = %uid,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message, returning the reply to send, if any.
async fn process_message(
    text: &str,
    state: &AppState,
    conn_id: &str,
    session: &SessionUser,
) -> Option<ServerMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return Some(ServerMessage::error(format!("Invalid message format: {}", e)));
        }
    };

    match client_msg {
        ClientMessage::Watch { path } => start_watch(state, conn_id, session, path).await,
        ClientMessage::Unwatch { path } => {
            state.conn_manager.unwatch(conn_id, &path);
            tracing::debug!(conn_id = %conn_id, path = %path, "Watch closed");
            None
        }
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

/// Register a watch and deliver its initial snapshot.
///
/// The snapshot is read and sent under the path's commit lock so it cannot be
/// overtaken by a snapshot for an older commit.
async fn start_watch(
    state: &AppState,
    conn_id: &str,
    session: &SessionUser,
    path: StoragePath,
) -> Option<ServerMessage> {
    if !path.is_owned_by(&session.user.uid) {
        tracing::debug!(conn_id = %conn_id, path = %path, "Watch denied");
        return Some(ServerMessage::WatchError {
            path,
            message: "permission denied".into(),
        });
    }

    let _guard = state.conn_manager.lock_path(&path).await;
    state.conn_manager.watch(conn_id, &path);

    match db::list_documents(&state.pool, &path).await {
        Ok(documents) => {
            tracing::debug!(conn_id = %conn_id, path = %path, "Watch opened");
            state
                .conn_manager
                .send_to(conn_id, ServerMessage::snapshot(path, documents));
            None
        }
        Err(e) => {
            tracing::error!(conn_id = %conn_id, path = %path, "Failed to load snapshot: {:?}", e);
            state.conn_manager.unwatch(conn_id, &path);
            Some(ServerMessage::WatchError {
                path,
                message: "failed to load snapshot".into(),
            })
        }
    }
}
