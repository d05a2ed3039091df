//! Client configuration loaded from environment variables.

use crate::identity::DEFAULT_RESOLVE_TIMEOUT;
use crate::path::DEFAULT_TENANT;
use std::env;
use std::time::Duration;

/// Settings a host application supplies to a [`SyncSession`](crate::SyncSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Tenant all paths are scoped to
    pub tenant_id: String,
    /// Pre-provisioned token tried before anonymous sign-in
    pub initial_auth_token: Option<String>,
    /// Base URL of a remote document server, if any
    pub backend_url: Option<String>,
    /// Upper bound for each identity resolution step
    pub identity_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tenant_id: DEFAULT_TENANT.to_string(),
            initial_auth_token: None,
            backend_url: None,
            identity_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }
}

impl SyncConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tenant_id = present("BEAVER_TENANT_ID").unwrap_or_else(|| DEFAULT_TENANT.to_string());
        let initial_auth_token = present("BEAVER_INITIAL_AUTH_TOKEN");

        let backend_url = match present("BEAVER_BACKEND_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Some(url.trim_end_matches('/').to_string())
            }
            Some(url) => return Err(ConfigError::InvalidBackendUrl(url)),
            None => None,
        };

        let identity_timeout = match present("BEAVER_IDENTITY_TIMEOUT_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .ok_or(ConfigError::InvalidTimeout(raw))?,
            None => DEFAULT_RESOLVE_TIMEOUT,
        };

        Ok(Self {
            tenant_id,
            initial_auth_token,
            backend_url,
            identity_timeout,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("BEAVER_BACKEND_URL must be an http(s) URL, got '{0}'")]
    InvalidBackendUrl(String),

    #[error("BEAVER_IDENTITY_TIMEOUT_MS must be a positive integer, got '{0}'")]
    InvalidTimeout(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(load(&[]).unwrap(), SyncConfig::default());
    }

    #[test]
    fn blank_tenant_uses_default() {
        let config = load(&[("BEAVER_TENANT_ID", "  ")]).unwrap();
        assert_eq!(config.tenant_id, DEFAULT_TENANT);
    }

    #[test]
    fn reads_all_values() {
        let config = load(&[
            ("BEAVER_TENANT_ID", "acme"),
            ("BEAVER_INITIAL_AUTH_TOKEN", "tok"),
            ("BEAVER_BACKEND_URL", "http://localhost:3000/"),
            ("BEAVER_IDENTITY_TIMEOUT_MS", "2500"),
        ])
        .unwrap();
        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.initial_auth_token.as_deref(), Some("tok"));
        assert_eq!(config.backend_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.identity_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("BEAVER_BACKEND_URL", "localhost")]),
            Err(ConfigError::InvalidBackendUrl(_))
        ));
        assert!(matches!(
            load(&[("BEAVER_IDENTITY_TIMEOUT_MS", "soon")]),
            Err(ConfigError::InvalidTimeout(_))
        ));
        assert!(matches!(
            load(&[("BEAVER_IDENTITY_TIMEOUT_MS", "0")]),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }
}
