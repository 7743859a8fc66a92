use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::status::StatusRecord;
use crate::store::{validate_key, Document, DocumentStore};

/// In-process document store.
///
/// Used by tests and dry runs. Writes to a collection registered with
/// [`fail_writes_to`](Self::fail_writes_to) return an IO error, which lets
/// callers exercise their partial-write handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    status: RwLock<Vec<StatusRecord>>,
    failing: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` into `collection` fail.
    pub fn fail_writes_to(mut self, collection: impl Into<String>) -> Self {
        self.failing.insert(collection.into());
        self
    }

    /// Number of documents currently held in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        validate_key(collection, Some(id))?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn put(&self, collection: &str, id: &str, document: &Value) -> StoreResult<()> {
        validate_key(collection, Some(id))?;
        if self.failing.contains(collection) {
            return Err(StoreError::Io(io::Error::other(format!(
                "writes to {} are disabled",
                collection
            ))));
        }
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        validate_key(collection, None)?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append_status(&self, record: &StatusRecord) -> StoreResult<()> {
        self.status.write().await.push(record.clone());
        Ok(())
    }

    async fn load_status(&self) -> StoreResult<Vec<StatusRecord>> {
        Ok(self.status.read().await.clone())
    }

    async fn prune_status(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut status = self.status.write().await;
        let before = status.len();
        status.retain(|r| r.recorded_at >= cutoff);
        Ok(before - status.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_orders_by_id() {
        let store = MemoryStore::new();
        store.put("posts", "p-2", &json!({})).await.expect("put");
        store.put("posts", "p-1", &json!({})).await.expect("put");

        let ids: Vec<_> = store
            .list("posts")
            .await
            .expect("list")
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
        assert_eq!(store.count("posts").await, 2);
    }

    #[tokio::test]
    async fn test_failing_collection_rejects_writes() {
        let store = MemoryStore::new().fail_writes_to("users/u-1/posts");
        assert!(store.put("posts", "p-1", &json!({})).await.is_ok());
        assert!(matches!(
            store.put("users/u-1/posts", "p-1", &json!({})).await,
            Err(StoreError::Io(_))
        ));
    }
}
