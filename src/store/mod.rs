//! Document persistence.
//!
//! [`DocumentStore`] is the persistence sink every task writes through:
//! JSON documents keyed by collection and id (overwrites allowed, so writes
//! are idempotent per id) plus an append-only status log.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::batch::WorkItem;
use crate::error::{StoreError, StoreResult};
use crate::status::StatusRecord;

pub use file::FileStore;
pub use memory::MemoryStore;

/// A stored document with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// Async persistence capability.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Create or overwrite one document.
    async fn put(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()>;

    /// All documents of a collection, ordered by id.
    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Append a status/metrics record to the status log.
    async fn append_status(&self, record: &StatusRecord) -> StoreResult<()>;

    /// Every status record, oldest first.
    async fn load_status(&self) -> StoreResult<Vec<StatusRecord>>;

    /// Delete status records recorded before `cutoff`; returns how many.
    async fn prune_status(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}

/// Query capability returning the work items to process.
#[async_trait]
pub trait WorkSource<P>: Send + Sync {
    async fn fetch(&self) -> StoreResult<Vec<WorkItem<P>>>;
}

/// Read and deserialize one document.
pub async fn get_as<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
) -> StoreResult<Option<T>> {
    match store.get(collection, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write one document.
pub async fn put_as<T: Serialize + Sync>(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    document: &T,
) -> StoreResult<()> {
    let value = serde_json::to_value(document)?;
    store.put(collection, id, &value).await
}

/// Check that a collection path or document id is safe to use as a key.
///
/// Collections may be nested with `/` (e.g. `users/u-1/accounts`); every
/// segment must be non-empty, must not be `.` or `..`, and must not start
/// with `_`, which is reserved for store internals. Ids are a single segment.
pub fn validate_key(collection: &str, id: Option<&str>) -> StoreResult<()> {
    let segment_ok = |segment: &str| {
        !segment.trim().is_empty()
            && segment != "."
            && segment != ".."
            && !segment.starts_with('_')
            && !segment.contains('\\')
            && !segment.contains('\0')
    };

    if !collection.split('/').all(segment_ok) {
        return Err(StoreError::InvalidPath(collection.to_string()));
    }
    if let Some(id) = id {
        if id.contains('/') || !segment_ok(id) {
            return Err(StoreError::InvalidPath(format!("{}/{}", collection, id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_validate_key_accepts_nested_collections() {
        assert!(validate_key("accounts", Some("acct-1")).is_ok());
        assert!(validate_key("users/u-1/accounts", Some("acct-1")).is_ok());
        assert!(validate_key("posts", None).is_ok());
    }

    #[test]
    fn test_validate_key_rejects_traversal_and_empty() {
        assert!(validate_key("", Some("a")).is_err());
        assert!(validate_key("accounts", Some("")).is_err());
        assert!(validate_key("../etc", Some("a")).is_err());
        assert!(validate_key("accounts", Some("..")).is_err());
        assert!(validate_key("accounts", Some("a/b")).is_err());
        assert!(validate_key("users//accounts", None).is_err());
        assert!(validate_key("_status", None).is_err());
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        text: String,
    }

    #[tokio::test]
    async fn test_typed_helpers_round_trip_through_store() {
        let store = MemoryStore::new();
        let note = Note {
            text: "hello".to_string(),
        };

        put_as(&store, "notes", "n-1", &note).await.expect("put");
        let loaded: Option<Note> = get_as(&store, "notes", "n-1").await.expect("get");
        assert_eq!(loaded, Some(note));

        let missing: Option<Note> = get_as(&store, "notes", "n-2").await.expect("get");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_as_reports_shape_mismatch() {
        let store = MemoryStore::new();
        store
            .put("notes", "n-1", &json!({"unexpected": true}))
            .await
            .expect("put");

        let result: StoreResult<Option<Note>> = get_as(&store, "notes", "n-1").await;
        assert!(matches!(result, Err(StoreError::Json(_))));
    }
}
