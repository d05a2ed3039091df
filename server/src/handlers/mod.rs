//! Request handlers for auth, documents and live watches.

mod auth;
mod documents;
mod websocket;

pub use auth::*;
pub use documents::*;
pub use websocket::handle_websocket_connection;

/// A fresh 20-character identifier, used for uids and document ids.
pub(crate) fn new_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(20);
    id
}

/// A fresh opaque session token.
pub(crate) fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_shape() {
        let id = new_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(beaver_sync::path::validate_document_id(&id).is_ok());
        assert_ne!(new_id(), id);
    }

    #[test]
    fn test_new_token_is_unique() {
        assert_eq!(new_token().len(), 32);
        assert_ne!(new_token(), new_token());
    }
}
