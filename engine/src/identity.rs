//! Identity resolution for the current session.
//!
//! [`IdentityResolver::resolve`] is an action, not an accessor: when no
//! backend session exists it will exchange a configured token or create an
//! anonymous session on the backend. Use [`IdentityResolver::peek`] to read the
//! memoized identity without side effects.

use crate::backend::{AuthBackend, BackendResult};
use crate::error::Result;
use crate::wire::AuthUser;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Default upper bound for each backend call made while resolving.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// How an identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// A backend account; the id is stable for the account lifetime
    Registered,
    /// An anonymous backend session; the id is ephemeral
    Anonymous,
    /// No backend session could be established; the id is a local placeholder
    Degraded,
}

/// The actor on whose behalf reads and writes are scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn registered(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IdentityKind::Registered,
        }
    }

    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IdentityKind::Anonymous,
        }
    }

    /// A fresh placeholder identity that no backend will authorize.
    pub fn degraded() -> Self {
        let token = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("degraded-{}", token.get(..8).unwrap_or(&token)),
            kind: IdentityKind::Degraded,
        }
    }

    /// Whether the backend will accept reads and writes for this identity.
    pub fn is_authenticated(&self) -> bool {
        self.kind != IdentityKind::Degraded
    }

    /// Whether the id can be trusted across sessions.
    pub fn is_stable(&self) -> bool {
        self.kind == IdentityKind::Registered
    }
}

impl From<AuthUser> for Identity {
    fn from(user: AuthUser) -> Self {
        if user.anonymous {
            Identity::anonymous(user.uid)
        } else {
            Identity::registered(user.uid)
        }
    }
}

/// Resolves and memoizes the session identity.
pub struct IdentityResolver {
    auth: Arc<dyn AuthBackend>,
    initial_auth_token: Option<String>,
    timeout: Duration,
    current: Mutex<Option<Identity>>,
    // Held for the whole resolution so concurrent callers share one attempt.
    gate: AsyncMutex<()>,
}

impl IdentityResolver {
    pub fn new(auth: Arc<dyn AuthBackend>) -> Self {
        Self {
            auth,
            initial_auth_token: None,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
            current: Mutex::new(None),
            gate: AsyncMutex::new(()),
        }
    }

    /// Configure a pre-provisioned token to exchange before falling back to
    /// an anonymous session.
    pub fn with_initial_auth_token(mut self, token: Option<String>) -> Self {
        self.initial_auth_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// Bound each backend call made while resolving.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The memoized identity, without contacting the backend.
    pub fn peek(&self) -> Option<Identity> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store(&self, identity: Option<Identity>) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = identity;
    }

    /// Return the session identity, establishing one if needed.
    ///
    /// Tries, in order: the backend's existing session, the configured token,
    /// an anonymous session. If all of them fail the result is a
    /// [`IdentityKind::Degraded`] placeholder. Never fails and never waits
    /// longer than the configured timeout per backend call.
    pub async fn resolve(&self) -> Identity {
        let _gate = self.gate.lock().await;
        if let Some(identity) = self.peek() {
            return identity;
        }

        let identity = self.establish().await;
        tracing::info!(
            identity = %identity.id,
            kind = ?identity.kind,
            "identity resolved"
        );
        self.store(Some(identity.clone()));
        identity
    }

    async fn establish(&self) -> Identity {
        match self.bounded("current session", self.auth.current_user()).await {
            Some(Some(user)) => return user.into(),
            Some(None) => tracing::debug!("no existing backend session"),
            None => {}
        }

        if let Some(token) = &self.initial_auth_token {
            let exchanged = self
                .bounded(
                    "custom token exchange",
                    self.auth.sign_in_with_custom_token(token),
                )
                .await;
            if let Some(user) = exchanged {
                return Identity::registered(user.uid);
            }
        }

        if let Some(user) = self
            .bounded("anonymous sign-in", self.auth.sign_in_anonymously())
            .await
        {
            return Identity::anonymous(user.uid);
        }

        let identity = Identity::degraded();
        tracing::warn!(
            identity = %identity.id,
            "all sign-in attempts failed, continuing with a degraded identity"
        );
        identity
    }

    async fn bounded<T>(
        &self,
        step: &str,
        call: impl Future<Output = BackendResult<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!(step, error = %e, "identity step failed");
                None
            }
            Err(_) => {
                tracing::warn!(step, timeout = ?self.timeout, "identity step timed out");
                None
            }
        }
    }

    /// Forget the memoized identity so the next [`resolve`](Self::resolve)
    /// starts over.
    pub async fn invalidate(&self) {
        let _gate = self.gate.lock().await;
        self.store(None);
    }

    /// Sign in with an email account, replacing the current identity.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity> {
        let _gate = self.gate.lock().await;
        let user = self.auth.sign_in_with_password(email, password).await?;
        let identity = Identity::from(user);
        tracing::info!(identity = %identity.id, "signed in with password");
        self.store(Some(identity.clone()));
        Ok(identity)
    }

    /// Register an email account, replacing the current identity.
    pub async fn register_with_password(&self, email: &str, password: &str) -> Result<Identity> {
        let _gate = self.gate.lock().await;
        let user = self.auth.register_with_password(email, password).await?;
        let identity = Identity::from(user);
        tracing::info!(identity = %identity.id, "registered new account");
        self.store(Some(identity.clone()));
        Ok(identity)
    }

    /// End the backend session and forget the identity.
    pub async fn sign_out(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.auth.sign_out().await?;
        self.store(None);
        tracing::info!("signed out");
        Ok(())
    }
}
