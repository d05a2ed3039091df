//! Tenant- and identity-scoped storage paths.
//!
//! Every collection lives at `tenants/{tenant}/users/{identity}/{collection}`
//! and every document one level below it. Tenant and identity ids are
//! sanitized before they are spliced into the template, so a path always has
//! exactly four separators no matter what the ids contain.

use crate::{error::Result, identity::Identity, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant used when none is configured.
pub const DEFAULT_TENANT: &str = "default-canvas-app";

/// Number of `/` separators in a collection path.
pub const PATH_SEPARATORS: usize = 4;

const TENANTS: &str = "tenants";
const USERS: &str = "users";

/// Replace every delimiter or reserved character with a harmless substitute.
///
/// `.` becomes `-`; path delimiters, whitespace, control characters and
/// URL/query metacharacters become `_`. The substitutes are themselves never
/// rewritten, so sanitizing twice is the same as sanitizing once.
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' => '-',
            '/' | '\\' | '#' | '?' | '%' | '[' | ']' | '*' | '~' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// The deterministic address of one collection for one tenant and identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath {
    full: String,
    tenant: String,
    identity: String,
    collection: String,
}

impl StoragePath {
    /// Parse an already-built collection path, rejecting anything that does
    /// not match the template or contains unsanitized segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        let [tenants, tenant, users, identity, collection] = parts.as_slice() else {
            return Err(Error::Invalid(format!(
                "expected {} separators in path '{raw}'",
                PATH_SEPARATORS
            )));
        };
        if *tenants != TENANTS || *users != USERS {
            return Err(Error::Invalid(format!("unrecognized path layout '{raw}'")));
        }
        for segment in [tenant, identity, collection] {
            if segment.is_empty() || sanitize_segment(segment) != **segment {
                return Err(Error::Invalid(format!(
                    "invalid path segment '{segment}' in '{raw}'"
                )));
            }
        }
        Ok(Self::assemble(tenant, identity, collection))
    }

    fn assemble(tenant: &str, identity: &str, collection: &str) -> Self {
        Self {
            full: format!("{TENANTS}/{tenant}/{USERS}/{identity}/{collection}"),
            tenant: tenant.to_string(),
            identity: identity.to_string(),
            collection: collection.to_string(),
        }
    }

    /// The full path string.
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Sanitized tenant segment.
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Sanitized identity segment.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether this path belongs to the given principal id.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.identity == sanitize_segment(uid.trim())
    }

    /// Path of a single document in this collection.
    pub fn document(&self, id: &str) -> Result<String> {
        validate_document_id(id)?;
        Ok(format!("{}/{}", self.full, id))
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        StoragePath::parse(&value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.full
    }
}

/// Derive the storage path for `collection` owned by `identity` in `tenant_id`.
///
/// An empty or blank tenant falls back to [`DEFAULT_TENANT`]. Collection names
/// are fixed by the application and must already be path-safe.
pub fn resolve_path(tenant_id: &str, identity: &Identity, collection: &str) -> Result<StoragePath> {
    let tenant = match tenant_id.trim() {
        "" => DEFAULT_TENANT.to_string(),
        t => sanitize_segment(t),
    };

    let identity_id = sanitize_segment(identity.id.trim());
    if identity_id.is_empty() {
        return Err(Error::Invalid("identity id is empty".into()));
    }

    if collection.is_empty() || sanitize_segment(collection) != collection {
        return Err(Error::Invalid(format!(
            "collection name '{collection}' is not path-safe"
        )));
    }

    Ok(StoragePath::assemble(&tenant, &identity_id, collection))
}

/// Document ids are backend-assigned, but callers pass them back on update and
/// delete; reject anything that could escape the collection.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() || sanitize_segment(id) != id {
        return Err(Error::Invalid(format!("invalid document id '{id}'")));
    }
    Ok(())
}
