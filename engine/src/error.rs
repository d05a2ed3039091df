//! Error types for the Beaver sync layer.

use crate::EntityId;
use thiserror::Error;

/// All failures surfaced to callers of the sync layer.
///
/// Identity resolution never produces one of these (it degrades instead), and
/// live subscriptions report failures as an empty delivery. Mutations and
/// session operations propagate them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// No usable identity for the requested operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The mutation target does not exist.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// Network or backend failure. Safe to retry.
    #[error("backend unavailable: {0}")]
    Transient(String),

    /// Malformed input (path segments, ids, payloads).
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The session has been torn down.
    #[error("sync session closed")]
    SessionClosed,
}

impl Error {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Human-readable message naming the failed action, suitable for a
    /// dismissable notification.
    pub fn notice(&self, action: &str) -> String {
        let cause = match self {
            Error::Unauthorized(_) => "you are not signed in".to_string(),
            Error::NotFound(id) => format!("record {id} no longer exists"),
            Error::Transient(_) => "the server could not be reached, please try again".to_string(),
            Error::Invalid(msg) => msg.clone(),
            Error::SessionClosed => "the session has ended".to_string(),
        };
        format!("Could not {action}: {cause}.")
    }
}

/// Result type for sync layer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::NotFound("abc".into());
        assert_eq!(err.to_string(), "entity not found: abc");

        let err = Error::Unauthorized("degraded identity".into());
        assert_eq!(err.to_string(), "unauthorized: degraded identity");

        assert_eq!(Error::SessionClosed.to_string(), "sync session closed");
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::Transient("timeout".into()).is_retryable());
        assert!(!Error::NotFound("x".into()).is_retryable());
        assert!(!Error::Unauthorized("x".into()).is_retryable());
        assert!(!Error::Invalid("x".into()).is_retryable());
    }

    #[test]
    fn notice_names_action_and_cause() {
        let msg = Error::NotFound("p1".into()).notice("update product");
        assert_eq!(msg, "Could not update product: record p1 no longer exists.");

        let msg = Error::Invalid("name is required".into()).notice("add customer");
        assert_eq!(msg, "Could not add customer: name is required.");
    }
}
