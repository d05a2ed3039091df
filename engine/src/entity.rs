//! Normalized entities delivered to callers.

use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::Result;
use crate::wire::RawDocument;
use crate::{EntityId, Error, Timestamp};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Field holding the entity id in flattened records.
pub const ID_FIELD: &str = "id";
/// Creation timestamp field, stamped by the backend.
pub const CREATED_AT: &str = "createdAt";
/// Modification timestamp field, stamped by the backend.
pub const LAST_UPDATED: &str = "lastUpdated";

/// Fields the sync layer owns. Callers never write these.
pub const MANAGED_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT, LAST_UPDATED];

/// A stored record (product, customer, ...) with backend-managed id and
/// timestamps.
///
/// Serializes as one flat object, matching how the record is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub created_at: Timestamp,
    pub last_updated: Timestamp,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Normalize a backend document.
    ///
    /// The backend document id always replaces any `id` present in the stored
    /// fields. Missing timestamps borrow from each other (or the epoch), and
    /// `last_updated` is clamped so it is never earlier than `created_at`.
    pub fn from_raw(raw: RawDocument) -> Self {
        let RawDocument { id, mut fields } = raw;
        fields.remove(ID_FIELD);

        let created = fields.remove(CREATED_AT).as_ref().and_then(parse_timestamp);
        let updated = fields.remove(LAST_UPDATED).as_ref().and_then(parse_timestamp);

        let (created_at, last_updated) = match (created, updated) {
            (Some(c), Some(u)) => (c, u.max(c)),
            (Some(t), None) | (None, Some(t)) => (t, t),
            (None, None) => (DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::UNIX_EPOCH),
        };

        Self {
            id,
            created_at,
            last_updated,
            fields,
        }
    }

    /// Look up a caller-defined field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The flat stored form: caller fields plus id and timestamps.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_FIELD.into(), Value::String(self.id.clone()));
        map.insert(
            CREATED_AT.into(),
            Value::String(format_timestamp(self.created_at)),
        );
        map.insert(
            LAST_UPDATED.into(),
            Value::String(format_timestamp(self.last_updated)),
        );
        Value::Object(map)
    }

    /// Deserialize the caller fields into a typed model.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| Error::Invalid(format!("entity {} does not match model: {e}", self.id)))
    }
}

/// Normalize a full snapshot, keeping one entity per id.
///
/// Order follows the snapshot; when an id repeats, the later document wins
/// and takes the earlier one's position.
pub fn normalize_snapshot(documents: Vec<RawDocument>) -> Vec<Entity> {
    let mut index: HashMap<EntityId, usize> = HashMap::with_capacity(documents.len());
    let mut entities: Vec<Entity> = Vec::with_capacity(documents.len());

    for raw in documents {
        let entity = Entity::from_raw(raw);
        match index.get(&entity.id) {
            Some(&pos) => {
                if let Some(slot) = entities.get_mut(pos) {
                    *slot = entity;
                }
            }
            None => {
                index.insert(entity.id.clone(), entities.len());
                entities.push(entity);
            }
        }
    }

    entities
}

/// Turn a caller payload into writable fields.
///
/// The payload must be a JSON object; managed fields are dropped.
pub fn writable_fields(data: Value) -> Result<Map<String, Value>> {
    let Value::Object(mut fields) = data else {
        return Err(Error::Invalid("entity data must be a JSON object".into()));
    };
    for managed in MANAGED_FIELDS {
        fields.remove(managed);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(id: &str, fields: Value) -> RawDocument {
        match fields {
            Value::Object(map) => RawDocument::new(id, map),
            _ => panic!("fields must be an object"),
        }
    }

    #[test]
    fn backend_id_wins() {
        let entity = Entity::from_raw(raw(
            "backend-id",
            json!({"id": "stale", "name": "Widget"}),
        ));
        assert_eq!(entity.id, "backend-id");
        assert_eq!(entity.get("id"), None);
        assert_eq!(entity.get("name"), Some(&json!("Widget")));
    }

    #[test]
    fn parses_timestamps() {
        let entity = Entity::from_raw(raw(
            "X",
            json!({
                "createdAt": "2024-01-01T00:00:00.000Z",
                "lastUpdated": "2024-01-02T00:00:00.000Z"
            }),
        ));
        assert_eq!(
            entity.created_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            entity.last_updated,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn clamps_inverted_timestamps() {
        let entity = Entity::from_raw(raw(
            "X",
            json!({
                "createdAt": "2024-01-02T00:00:00.000Z",
                "lastUpdated": "2024-01-01T00:00:00.000Z"
            }),
        ));
        assert_eq!(entity.last_updated, entity.created_at);
    }

    #[test]
    fn missing_timestamps_borrow() {
        let entity = Entity::from_raw(raw("X", json!({"lastUpdated": "2024-05-06"})));
        assert_eq!(entity.created_at, entity.last_updated);

        let entity = Entity::from_raw(raw("X", json!({})));
        assert_eq!(entity.created_at, DateTime::<Utc>::UNIX_EPOCH);
        assert!(entity.last_updated >= entity.created_at);
    }

    #[test]
    fn snapshot_dedupes_by_id() {
        let entities = normalize_snapshot(vec![
            raw("A", json!({"v": 1})),
            raw("B", json!({"v": 2})),
            raw("A", json!({"v": 3})),
        ]);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "A");
        assert_eq!(entities[0].get("v"), Some(&json!(3)));
        assert_eq!(entities[1].id, "B");
    }

    #[test]
    fn writable_fields_strip_managed() {
        let fields = writable_fields(json!({
            "id": "client-chosen",
            "createdAt": "2000-01-01",
            "lastUpdated": "2000-01-01",
            "name": "Widget"
        }))
        .unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["name"], json!("Widget"));
    }

    #[test]
    fn writable_fields_require_object() {
        assert!(matches!(
            writable_fields(json!([1, 2])),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn to_value_is_flat() {
        let entity = Entity::from_raw(raw(
            "X",
            json!({"name": "Widget", "createdAt": "2024-01-01T00:00:00.000Z"}),
        ));
        let value = entity.to_value();
        assert_eq!(value["id"], json!("X"));
        assert_eq!(value["name"], json!("Widget"));
        assert_eq!(value["createdAt"], json!("2024-01-01T00:00:00.000Z"));
        assert_eq!(value["lastUpdated"], json!("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn serde_flattens_fields() {
        let entity = Entity::from_raw(raw("X", json!({"name": "Widget"})));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["id"], json!("X"));
        assert_eq!(json["name"], json!("Widget"));
        assert!(json.get("fields").is_none());
    }
}
