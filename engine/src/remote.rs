//! Backend client for a `beaver-server` instance.
//!
//! Auth and mutations are JSON over HTTP; every live watch opens its own
//! WebSocket. The session token is kept in memory only.

use crate::backend::{AuthBackend, BackendError, BackendResult, DocumentStore, SnapshotStream};
use crate::config::SyncConfig;
use crate::wire::{
    AuthResponse, AuthUser, ClientMessage, CreateDocumentRequest, CreateDocumentResponse,
    CredentialsRequest, CustomTokenRequest, DocumentWrite, ErrorBody, ListDocumentsResponse,
    RawDocument, ServerMessage, UpdateDocumentRequest,
};
use crate::{EntityId, Error, StoragePath};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::sync::RwLock;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Map an HTTP failure status onto the backend taxonomy.
fn status_error(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::BAD_REQUEST => BackendError::InvalidArgument(message),
        StatusCode::UNAUTHORIZED => BackendError::Unauthenticated(message),
        StatusCode::FORBIDDEN => BackendError::PermissionDenied(message),
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        _ => BackendError::Unavailable(message),
    }
}

fn transport(err: impl std::fmt::Display) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

/// Derive the WebSocket base from an HTTP base URL.
fn websocket_base(base_url: &str) -> BackendResult<String> {
    if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(BackendError::InvalidArgument(format!(
            "unsupported backend url '{base_url}'"
        )))
    }
}

/// HTTP + WebSocket backend.
#[derive(Debug)]
pub struct RemoteBackend {
    http: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    /// Build a client for the configured backend URL.
    pub fn from_config(config: &SyncConfig) -> crate::Result<Self> {
        config
            .backend_url
            .as_deref()
            .map(Self::new)
            .ok_or_else(|| Error::Invalid("BEAVER_BACKEND_URL is not set".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_bearer(&self, token: Option<String>) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let request = match self.bearer() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(ErrorBody {
                error,
                details: Some(details),
            }) => format!("{error}: {details}"),
            Ok(ErrorBody { error, .. }) => error,
            Err(_) => status.to_string(),
        };
        tracing::debug!(%status, message = %message, "backend request failed");
        Err(status_error(status, message))
    }

    async fn authenticate<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> BackendResult<AuthUser> {
        let response = self
            .send(self.http.post(self.url(endpoint)).json(body))
            .await?;
        let AuthResponse { token, user } = response.json().await.map_err(transport)?;
        self.set_bearer(Some(token));
        tracing::debug!(uid = %user.uid, endpoint, "backend session opened");
        Ok(user)
    }

    async fn open_socket(&self, path: &StoragePath) -> BackendResult<Socket> {
        let token = self
            .bearer()
            .ok_or_else(|| BackendError::Unauthenticated("no backend session".into()))?;
        let url = format!("{}/ws?token={token}", websocket_base(&self.base_url)?);
        let (mut socket, _) = connect_async(url).await.map_err(transport)?;

        let watch = serde_json::to_string(&ClientMessage::Watch { path: path.clone() })
            .map_err(|e| BackendError::InvalidArgument(e.to_string()))?;
        socket
            .send(Message::Text(watch))
            .await
            .map_err(transport)?;
        Ok(socket)
    }
}

struct WatchSocket {
    path: StoragePath,
    read: SplitStream<Socket>,
    // Held so the connection stays open for the lifetime of the watch.
    _write: SplitSink<Socket, Message>,
}

impl WatchSocket {
    /// Next snapshot for the watched path, or the error that ends the watch.
    async fn next_snapshot(&mut self) -> Option<BackendResult<Vec<RawDocument>>> {
        loop {
            let message = match self.read.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Some(Err(transport(e))),
                None => return Some(Err(transport("watch connection closed"))),
            };
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return Some(Err(transport("watch connection closed"))),
                _ => continue,
            };
            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Snapshot { path, documents }) if path == self.path => {
                    return Some(Ok(documents))
                }
                Ok(ServerMessage::WatchError { path, message }) if path == self.path => {
                    return Some(Err(BackendError::Unavailable(message)))
                }
                Ok(ServerMessage::Error { message }) => {
                    return Some(Err(BackendError::Unavailable(message)))
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %self.path, error = %e, "ignoring malformed server message");
                    continue;
                }
            }
        }
    }
}

#[async_trait]
impl AuthBackend for RemoteBackend {
    async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
        if self.bearer().is_none() {
            return Ok(None);
        }
        match self.send(self.http.get(self.url("/auth/me"))).await {
            Ok(response) => response.json().await.map(Some).map_err(transport),
            Err(BackendError::Unauthenticated(_)) => {
                self.set_bearer(None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in_with_custom_token(&self, token: &str) -> BackendResult<AuthUser> {
        self.authenticate(
            "/auth/custom-token",
            &CustomTokenRequest {
                token: token.to_string(),
            },
        )
        .await
    }

    async fn sign_in_anonymously(&self) -> BackendResult<AuthUser> {
        self.authenticate("/auth/anonymous", &serde_json::json!({}))
            .await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<AuthUser> {
        self.authenticate(
            "/auth/sign-in",
            &CredentialsRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
        )
        .await
    }

    async fn register_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> BackendResult<AuthUser> {
        self.authenticate(
            "/auth/register",
            &CredentialsRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
        )
        .await
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if self.bearer().is_none() {
            return Ok(());
        }
        let result = self.send(self.http.post(self.url("/auth/sign-out"))).await;
        self.set_bearer(None);
        match result {
            Ok(_) | Err(BackendError::Unauthenticated(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DocumentStore for RemoteBackend {
    async fn add(&self, path: &StoragePath, write: DocumentWrite) -> BackendResult<EntityId> {
        let body = CreateDocumentRequest {
            path: path.clone(),
            write,
        };
        let response = self
            .send(self.http.post(self.url("/documents")).json(&body))
            .await?;
        let CreateDocumentResponse { id } = response.json().await.map_err(transport)?;
        Ok(id)
    }

    async fn update(
        &self,
        path: &StoragePath,
        id: &str,
        write: DocumentWrite,
    ) -> BackendResult<()> {
        let body = UpdateDocumentRequest {
            path: path.clone(),
            id: id.to_string(),
            write,
        };
        match self
            .send(self.http.patch(self.url("/documents")).json(&body))
            .await
        {
            Ok(_) => Ok(()),
            Err(BackendError::NotFound(_)) => Err(BackendError::NotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, path: &StoragePath, id: &str) -> BackendResult<()> {
        let request = self
            .http
            .delete(self.url("/documents"))
            .query(&[("path", path.as_str()), ("id", id)]);
        match self.send(request).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, path: &StoragePath) -> BackendResult<Vec<RawDocument>> {
        let request = self
            .http
            .get(self.url("/documents"))
            .query(&[("path", path.as_str())]);
        let ListDocumentsResponse { documents } = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(transport)?;
        Ok(documents)
    }

    async fn watch(&self, path: &StoragePath) -> BackendResult<SnapshotStream> {
        let (write, read) = self.open_socket(path).await?.split();
        tracing::debug!(path = %path, "watch socket opened");

        let state = WatchSocket {
            path: path.clone(),
            read,
            _write: write,
        };
        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut socket = state?;
            match socket.next_snapshot().await? {
                Ok(documents) => Some((Ok(documents), Some(socket))),
                // The first error ends the stream.
                Err(e) => Some((Err(e), None)),
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        let msg = || "boom".to_string();
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, msg()),
            BackendError::InvalidArgument(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, msg()),
            BackendError::Unauthenticated(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, msg()),
            BackendError::PermissionDenied(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, msg()),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, msg()),
            BackendError::Unavailable(_)
        ));
    }

    #[test]
    fn websocket_base_follows_scheme() {
        assert_eq!(websocket_base("http://localhost:3000").unwrap(), "ws://localhost:3000");
        assert_eq!(websocket_base("https://sync.example.com").unwrap(), "wss://sync.example.com");
        assert!(websocket_base("ftp://nope").is_err());
    }

    #[test]
    fn trims_trailing_slash() {
        let remote = RemoteBackend::new("http://localhost:3000/");
        assert_eq!(remote.url("/documents"), "http://localhost:3000/documents");
    }

    #[test]
    fn from_config_requires_url() {
        assert!(RemoteBackend::from_config(&SyncConfig::default()).is_err());

        let config = SyncConfig {
            backend_url: Some("http://localhost:3000".into()),
            ..SyncConfig::default()
        };
        assert!(RemoteBackend::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn signed_out_client_reports_no_user() {
        let remote = RemoteBackend::new("http://127.0.0.1:9");
        assert_eq!(remote.current_user().await.unwrap(), None);
        assert!(remote.sign_out().await.is_ok());
    }

    #[tokio::test]
    async fn watch_without_session_is_unauthenticated() {
        let remote = RemoteBackend::new("http://127.0.0.1:9");
        let path = StoragePath::parse("tenants/acme/users/u1/products").unwrap();
        assert!(matches!(
            remote.watch(&path).await,
            Err(BackendError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let remote = RemoteBackend::new("http://127.0.0.1:9");
        assert!(matches!(
            remote.sign_in_anonymously().await,
            Err(BackendError::Unavailable(_))
        ));
    }
}
