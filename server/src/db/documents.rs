//! Database operations for the documents table.

use beaver_sync::wire::RawDocument;
use beaver_sync::{StoragePath, Timestamp};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};

/// A stored document row from the database.
#[derive(Debug)]
pub struct StoredDocument {
    pub doc_id: String,
    pub fields: Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            doc_id: row.try_get("doc_id")?,
            fields: row.try_get("fields")?,
        })
    }
}

impl StoredDocument {
    /// Convert database row to the wire document.
    pub fn to_raw(self) -> RawDocument {
        let fields = match self.fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        RawDocument::new(self.doc_id, fields)
    }
}

/// All documents at a collection path, oldest first.
pub async fn list_documents(
    pool: &PgPool,
    path: &StoragePath,
) -> Result<Vec<RawDocument>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT doc_id, fields
        FROM documents
        WHERE path = $1
        ORDER BY created_at ASC, doc_id ASC
        "#,
    )
    .bind(path.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StoredDocument::to_raw).collect())
}

/// Insert a new document committed at `committed_at`.
pub async fn insert_document(
    pool: &PgPool,
    path: &StoragePath,
    doc_id: &str,
    fields: Map<String, Value>,
    committed_at: Timestamp,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO documents (path, doc_id, fields, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        "#,
    )
    .bind(path.as_str())
    .bind(doc_id)
    .bind(Value::Object(fields))
    .bind(committed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge top-level fields into an existing document.
///
/// Returns `false` when the document does not exist.
pub async fn merge_document(
    pool: &PgPool,
    path: &StoragePath,
    doc_id: &str,
    fields: Map<String, Value>,
    committed_at: Timestamp,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE documents
        SET fields = fields || $3, updated_at = $4
        WHERE path = $1 AND doc_id = $2
        "#,
    )
    .bind(path.as_str())
    .bind(doc_id)
    .bind(Value::Object(fields))
    .bind(committed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// The latest commit instant stored, if any document exists.
pub async fn latest_commit(pool: &PgPool) -> Result<Option<Timestamp>, sqlx::Error> {
    sqlx::query_scalar("SELECT MAX(updated_at) FROM documents")
        .fetch_one(pool)
        .await
}

/// Delete a document. Returns whether a row was removed.
pub async fn delete_document(
    pool: &PgPool,
    path: &StoragePath,
    doc_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM documents WHERE path = $1 AND doc_id = $2")
        .bind(path.as_str())
        .bind(doc_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_raw_keeps_fields() {
        let stored = StoredDocument {
            doc_id: "X".into(),
            fields: json!({"name": "Widget"}),
        };
        let raw = stored.to_raw();
        assert_eq!(raw.id, "X");
        assert_eq!(raw.fields["name"], json!("Widget"));
    }

    #[test]
    fn test_to_raw_tolerates_non_object() {
        let stored = StoredDocument {
            doc_id: "X".into(),
            fields: Value::Null,
        };
        assert!(stored.to_raw().fields.is_empty());
    }
}
