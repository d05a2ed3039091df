//! WebSocket connection manager.
//!
//! Tracks active connections, which paths each one watches, and a per-path
//! commit lock so snapshots for a path go out in commit order.

use std::collections::HashSet;
use std::sync::Arc;

use beaver_sync::StoragePath;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Principal the connection authenticated as
    pub uid: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections and their watches.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    pub(crate) connections: DashMap<String, Connection>,
    /// Connection IDs watching each path.
    watchers: DashMap<StoragePath, HashSet<String>>,
    /// Serializes commit-and-publish per path. Entries live only while the
    /// lock is held or awaited.
    path_locks: Arc<DashMap<StoragePath, Arc<Mutex<()>>>>,
}

/// Held commit lock for one path. Releasing the last holder removes the
/// path's entry.
pub struct PathGuard {
    guard: Option<OwnedMutexGuard<()>>,
    path: StoragePath,
    locks: Arc<DashMap<StoragePath, Arc<Mutex<()>>>>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, uid: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            uid,
            sender,
        };
        self.connections.insert(conn_id.clone(), connection);

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection and drop all of its watches.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            self.watchers.retain(|_, ids| {
                ids.remove(conn_id);
                !ids.is_empty()
            });

            tracing::info!(conn_id = %conn_id, uid = %conn.uid, "WebSocket connection unregistered");
        }
    }

    /// Start delivering snapshots of `path` to a connection.
    ///
    /// Returns `false` if the connection is unknown or already watching.
    pub fn watch(&self, conn_id: &str, path: &StoragePath) -> bool {
        if !self.connections.contains_key(conn_id) {
            return false;
        }
        self.watchers
            .entry(path.clone())
            .or_default()
            .insert(conn_id.to_string())
    }

    /// Stop delivering snapshots of `path` to a connection.
    pub fn unwatch(&self, conn_id: &str, path: &StoragePath) -> bool {
        let Some(mut ids) = self.watchers.get_mut(path) else {
            return false;
        };
        let removed = ids.remove(conn_id);
        if ids.is_empty() {
            drop(ids);
            self.watchers.remove_if(path, |_, ids| ids.is_empty());
        }
        removed
    }

    /// Send a message to every connection watching `path`.
    ///
    /// Returns the number of connections that received the message.
    pub fn publish(&self, path: &StoragePath, message: ServerMessage) -> usize {
        let targets: Vec<String> = match self.watchers.get(path) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return 0,
        };

        let sent_count = targets
            .iter()
            .filter(|id| self.send_to(id, message.clone()))
            .count();

        tracing::debug!(path = %path, recipients = sent_count, "Published snapshot");

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Acquire the commit lock for `path`.
    pub async fn lock_path(&self, path: &StoragePath) -> PathGuard {
        let lock = self
            .path_locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        PathGuard {
            guard: Some(lock.lock_owned().await),
            path: path.clone(),
            locks: Arc::clone(&self.path_locks),
        }
    }

    /// End every watch on `path` with a `watch_error`.
    ///
    /// Returns the number of connections that were told.
    pub fn close_watches(&self, path: &StoragePath, message: &str) -> usize {
        let Some((_, ids)) = self.watchers.remove(path) else {
            return 0;
        };
        ids.iter()
            .filter(|id| {
                self.send_to(
                    id,
                    ServerMessage::WatchError {
                        path: path.clone(),
                        message: message.to_string(),
                    },
                )
            })
            .count()
    }

    #[cfg(test)]
    fn locked_path_count(&self) -> usize {
        self.path_locks.len()
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections watching `path`.
    pub fn watcher_count(&self, path: &StoragePath) -> usize {
        self.watchers.get(path).map(|ids| ids.len()).unwrap_or(0)
    }
}
