//! Wire types shared by the remote backend client and the document server.
//!
//! REST bodies use camelCase; WebSocket messages are tagged by `type` and use
//! snake_case, mirroring the rest of the protocol.

use crate::{EntityId, StoragePath};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document exactly as the backend reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// Backend-assigned document id
    pub id: EntityId,
    /// Stored fields, which may themselves contain a stale `id`
    pub fields: Map<String, Value>,
}

impl RawDocument {
    pub fn new(id: impl Into<EntityId>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Field values for a write plus the fields the backend must stamp with its
/// own commit time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWrite {
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            server_timestamps: Vec::new(),
        }
    }

    /// Ask the backend to set `field` to the commit time.
    pub fn stamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamps.push(field.into());
        self
    }

    /// Resolve the stamped fields against a commit time, producing the fields
    /// to persist.
    pub fn resolve(self, commit_time: &str) -> Map<String, Value> {
        let mut fields = self.fields;
        for name in self.server_timestamps {
            fields.insert(name, Value::String(commit_time.to_string()));
        }
        fields
    }
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub anonymous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Response to every sign-in flavour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Bearer session token
    pub token: String,
    pub user: AuthUser,
}

/// Body of `POST /auth/custom-token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTokenRequest {
    pub token: String,
}

/// Shortest password `POST /auth/register` accepts, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Body of `POST /auth/register` and `POST /auth/sign-in`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Body of `POST /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentRequest {
    pub path: StoragePath,
    pub write: DocumentWrite,
}

/// Response to `POST /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDocumentResponse {
    pub id: EntityId,
}

/// Body of `PATCH /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDocumentRequest {
    pub path: StoragePath,
    pub id: EntityId,
    pub write: DocumentWrite,
}

/// Query of `GET /documents` and `DELETE /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentQuery {
    pub path: StoragePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
}

/// Response to `GET /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<RawDocument>,
}

/// Error body returned by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Messages sent from client to server over the watch socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving snapshots for a path.
    Watch { path: StoragePath },
    /// Stop receiving snapshots for a path.
    Unwatch { path: StoragePath },
    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client over the watch socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full current contents of a watched path.
    Snapshot {
        path: StoragePath,
        documents: Vec<RawDocument>,
    },
    /// A watch could not be opened or was terminated.
    WatchError { path: StoragePath, message: String },
    /// Response to ping.
    Pong,
    /// Protocol-level error.
    Error { message: String },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Create a snapshot message.
    pub fn snapshot(path: StoragePath, documents: Vec<RawDocument>) -> Self {
        ServerMessage::Snapshot { path, documents }
    }
}
