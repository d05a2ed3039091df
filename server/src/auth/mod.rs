//! Authentication: session extraction and password hashing.

mod middleware;
mod password;

pub use middleware::SessionUser;
pub use password::{hash_password, validate_credentials, verify_password};
