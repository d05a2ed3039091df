//! # Beaver Sync
//!
//! Authenticated, tenant-scoped, real-time collection sync.
//!
//! This crate keeps a client's view of its stored records (products,
//! customers, ...) in step with a document backend. It resolves who the
//! client is, derives where that identity's data lives, delivers the full
//! contents of a collection on every remote change, and performs writes with
//! backend-assigned ids and timestamps.
//!
//! ## Components
//!
//! - [`IdentityResolver`] - establishes the session identity: an existing
//!   backend session, a configured token, an anonymous session, or a
//!   [`IdentityKind::Degraded`] placeholder when the backend is unreachable.
//!   Never fails.
//! - [`resolve_path`] - maps `(tenant, identity, collection)` to
//!   `tenants/{tenant}/users/{identity}/{collection}`.
//! - [`CollectionSync`] - live subscriptions delivering the full normalized
//!   entity list on every snapshot.
//! - [`MutationGateway`] - create, update and delete with server-side
//!   timestamps.
//! - [`SyncSession`] - the façade tying them together and owning the
//!   subscription lifecycle.
//!
//! ## Backends
//!
//! Every component takes an explicitly constructed [`Backend`] handle. Two
//! implementations ship with the crate: [`MemoryBackend`], which runs in
//! process, and [`RemoteBackend`], which talks to `beaver-server` over HTTP
//! and WebSockets.
//!
//! ## Quick Start
//!
//! ```rust
//! use beaver_sync::{Backend, Entity, MemoryBackend, OnChange, SyncSession};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> beaver_sync::Result<()> {
//! let backend = Backend::from_shared(Arc::new(MemoryBackend::new()));
//! let session = SyncSession::builder().backend(backend).build()?;
//!
//! let identity = session.start("acme").await?;
//! println!("signed in as {}", identity.id);
//!
//! let on_change: OnChange = Arc::new(|products: Vec<Entity>| {
//!     println!("{} products", products.len());
//! });
//! let _products = session.subscribe("products", on_change).await?;
//!
//! let id = session
//!     .create("products", json!({"name": "Widget", "price": 9.99}))
//!     .await?;
//! session.update("products", &id, json!({"price": 12.5})).await?;
//! session.delete("products", &id).await?;
//!
//! session.end();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod collection;
pub mod config;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod memory;
pub mod model;
pub mod path;
pub mod remote;
pub mod session;
pub mod wire;

// Re-export main types at crate root
pub use backend::{AuthBackend, Backend, BackendBuilder, BackendError, DocumentStore};
pub use clock::ServerClock;
pub use collection::{CollectionSync, OnChange, Subscription};
pub use config::{ConfigError, SyncConfig};
pub use entity::Entity;
pub use error::{Error, Result};
pub use gateway::MutationGateway;
pub use identity::{Identity, IdentityKind, IdentityResolver};
pub use memory::MemoryBackend;
pub use model::{Customer, Document, Product};
pub use path::{resolve_path, sanitize_segment, StoragePath, DEFAULT_TENANT};
pub use remote::RemoteBackend;
pub use session::{SessionState, SyncSession, SyncSessionBuilder, Unsubscribe};

/// Type aliases for clarity
pub type TenantId = String;
pub type EntityId = String;
pub type CollectionName = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
