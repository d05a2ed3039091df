//! Edge case tests for beaver-sync
//!
//! These tests cover boundary conditions and unusual inputs.

use beaver_sync::clock::parse_timestamp;
use beaver_sync::entity::{normalize_snapshot, writable_fields};
use beaver_sync::path::PATH_SEPARATORS;
use beaver_sync::wire::RawDocument;
use beaver_sync::{resolve_path, sanitize_segment, Identity, StoragePath, DEFAULT_TENANT};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn raw(id: &str, fields: Value) -> RawDocument {
    match fields {
        Value::Object(map) => RawDocument::new(id, map),
        _ => RawDocument::new(id, Map::new()),
    }
}

// ============================================================================
// Path Edge Cases
// ============================================================================

#[test]
fn hostile_identity_ids() {
    let ids = [
        "../../etc/passwd",
        "a/b/c/d/e",
        "user#1?x=y",
        "white space\ttab\nnewline",
        "50%[admin]*~",
        "back\\slash",
        "null\0byte",
    ];

    for id in ids {
        let path = resolve_path("acme", &Identity::registered(id), "products").unwrap();
        assert_eq!(
            path.as_str().matches('/').count(),
            PATH_SEPARATORS,
            "Failed for: {:?}",
            id
        );
        assert_eq!(StoragePath::parse(path.as_str()).unwrap(), path);
        assert!(path.is_owned_by(id));
    }
}

#[test]
fn unicode_segments_survive() {
    let path = resolve_path("café", &Identity::registered("ユーザー"), "products").unwrap();
    assert_eq!(path.as_str(), "tenants/café/users/ユーザー/products");
}

#[test]
fn dots_only_identity() {
    let path = resolve_path("acme", &Identity::registered(".."), "products").unwrap();
    assert_eq!(path.identity(), "--");
}

#[test]
fn whitespace_only_identity_is_rejected() {
    assert!(resolve_path("acme", &Identity::registered("   "), "products").is_err());
}

#[test]
fn default_tenant_is_path_safe() {
    assert_eq!(sanitize_segment(DEFAULT_TENANT), DEFAULT_TENANT);
    let path = resolve_path("", &Identity::registered("u1"), "customers").unwrap();
    assert_eq!(
        path.as_str(),
        format!("tenants/{DEFAULT_TENANT}/users/u1/customers")
    );
}

#[test]
fn distinct_tenants_never_collide_with_layout() {
    // A tenant named like the layout keywords still lands in its own segment.
    let path = resolve_path("users", &Identity::registered("tenants"), "products").unwrap();
    assert_eq!(path.as_str(), "tenants/users/users/tenants/products");
    assert_eq!(path.tenant(), "users");
    assert_eq!(path.identity(), "tenants");
}

// ============================================================================
// Normalization Edge Cases
// ============================================================================

#[test]
fn empty_snapshot() {
    assert!(normalize_snapshot(Vec::new()).is_empty());
}

#[test]
fn unparseable_timestamps_fall_back() {
    let entities = normalize_snapshot(vec![raw(
        "A",
        json!({"createdAt": "not a date", "lastUpdated": {"seconds": 5}}),
    )]);
    assert_eq!(entities[0].created_at, entities[0].last_updated);
}

#[test]
fn mixed_timestamp_encodings() {
    let entities = normalize_snapshot(vec![raw(
        "A",
        json!({"createdAt": "2024-01-01", "lastUpdated": 1_704_153_600_000i64}),
    )]);
    assert_eq!(
        entities[0].created_at,
        parse_timestamp(&json!("2024-01-01T00:00:00Z")).unwrap()
    );
    assert_eq!(
        entities[0].last_updated,
        parse_timestamp(&json!("2024-01-02T00:00:00Z")).unwrap()
    );
}

#[test]
fn non_string_stored_id_is_dropped() {
    let entities = normalize_snapshot(vec![raw("A", json!({"id": 42, "name": "W"}))]);
    assert_eq!(entities[0].id, "A");
    assert!(entities[0].get("id").is_none());
}

#[test]
fn many_duplicates_collapse() {
    let documents = (0..100)
        .map(|i| raw(&format!("doc-{}", i % 3), json!({"n": i})))
        .collect();
    let entities = normalize_snapshot(documents);
    assert_eq!(entities.len(), 3);
    assert_eq!(entities[0].get("n"), Some(&json!(99)));
}

#[test]
fn deeply_nested_fields_are_kept() {
    let mut nested = json!({"value": "deep"});
    for _ in 0..50 {
        nested = json!({"nested": nested});
    }
    let fields = writable_fields(json!({"tree": nested.clone()})).unwrap();
    assert_eq!(fields["tree"], nested);
}

#[test]
fn null_payload_is_rejected() {
    assert!(writable_fields(Value::Null).is_err());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_resolve_path_is_deterministic(
        tenant in ".*",
        identity in ".+",
        collection in "[a-z]{1,12}",
    ) {
        let identity = Identity::registered(identity);
        let first = resolve_path(&tenant, &identity, &collection);
        let second = resolve_path(&tenant, &identity, &collection);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_resolved_path_has_fixed_shape(
        tenant in ".*",
        identity in "\\PC+",
        collection in "[a-z]{1,12}",
    ) {
        let identity = Identity::registered(identity);
        if let Ok(path) = resolve_path(&tenant, &identity, &collection) {
            prop_assert_eq!(path.as_str().matches('/').count(), PATH_SEPARATORS);
            prop_assert_eq!(StoragePath::parse(path.as_str()).unwrap(), path);
        }
    }

    #[test]
    fn prop_sanitize_is_idempotent(raw in ".*") {
        let once = sanitize_segment(&raw);
        prop_assert_eq!(sanitize_segment(&once), once.clone());
        prop_assert!(!once.contains('/'));
        prop_assert!(!once.contains('.'));
    }

    #[test]
    fn prop_normalized_entities_are_consistent(
        ids in proptest::collection::vec("[a-c]", 0..20),
        created in 0i64..2_000_000_000_000,
        updated in 0i64..2_000_000_000_000,
    ) {
        let documents = ids
            .iter()
            .map(|id| raw(id, json!({"id": "stale", "createdAt": created, "lastUpdated": updated})))
            .collect();
        let entities = normalize_snapshot(documents);

        let mut seen = std::collections::HashSet::new();
        for entity in &entities {
            prop_assert!(entity.last_updated >= entity.created_at);
            prop_assert_ne!(entity.id.as_str(), "stale");
            prop_assert!(seen.insert(entity.id.clone()));
        }
    }
}
