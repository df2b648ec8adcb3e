//! In-memory backend

use crate::{
    document::{DocKey, Document, StoredDocument, Version, WriteSet},
    error::Result,
    query::Query,
    store::{plan_commit, DocumentStore},
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Collections = BTreeMap<String, BTreeMap<String, StoredDocument>>;

#[derive(Debug, Default)]
struct Inner {
    collections: Collections,
    sequence: Version,
}

/// Process-local store, used by tests and the `memory` backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .read()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>> {
        let inner = self.inner.read();
        Ok(inner
            .collections
            .get(&key.collection)
            .and_then(|docs| docs.get(&key.id))
            .map(|stored| Document {
                id: key.id.clone(),
                version: stored.version,
                data: stored.data.clone(),
            }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let inner = self.inner.read();
        let candidates = inner
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .map(|(id, stored)| Document {
                id: id.clone(),
                version: stored.version,
                data: stored.data.clone(),
            });
        Ok(query.execute(candidates))
    }

    async fn commit(&self, writes: WriteSet) -> Result<()> {
        if writes.is_empty() && writes.preconditions.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write();
        let staged = plan_commit(&writes, |key| {
            Ok(inner
                .collections
                .get(&key.collection)
                .and_then(|docs| docs.get(&key.id))
                .cloned())
        })?;

        inner.sequence += 1;
        let version = inner.sequence;
        for (key, body) in staged {
            let docs = inner.collections.entry(key.collection).or_default();
            match body {
                Some(data) => {
                    docs.insert(key.id, StoredDocument { version, data });
                }
                None => {
                    docs.remove(&key.id);
                }
            }
        }

        tracing::debug!(version, writes = writes.ops.len(), "Commit applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Patch, WriteOp};
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_and_read_back() {
        let store = MemoryStore::new();
        let key = DocKey::new("wallets", "u1");
        store
            .commit(WriteSet {
                preconditions: vec![],
                ops: vec![WriteOp::Set {
                    key: key.clone(),
                    data: json!({"balance": "10"}),
                }],
            })
            .await
            .unwrap();

        let doc = store.get(&key).await.unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.data["balance"], json!("10"));
        assert_eq!(store.len("wallets"), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let store = MemoryStore::new();
        let result = store
            .commit(WriteSet {
                preconditions: vec![],
                ops: vec![
                    WriteOp::Set {
                        key: DocKey::new("leaderboard", "new"),
                        data: json!({"rank": 1}),
                    },
                    WriteOp::Update {
                        key: DocKey::new("leaderboard", "gone"),
                        patch: Patch::new().set("rank", 2),
                    },
                ],
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.len("leaderboard"), 0);
    }

    #[tokio::test]
    async fn test_delete_resets_version_to_absent() {
        let store = MemoryStore::new();
        let key = DocKey::new("teams", "t1");
        store
            .commit(WriteSet {
                preconditions: vec![],
                ops: vec![WriteOp::Set {
                    key: key.clone(),
                    data: json!({}),
                }],
            })
            .await
            .unwrap();
        store
            .commit(WriteSet {
                preconditions: vec![(key.clone(), 1)],
                ops: vec![WriteOp::Delete { key: key.clone() }],
            })
            .await
            .unwrap();

        assert!(store.get(&key).await.unwrap().is_none());
    }
}
