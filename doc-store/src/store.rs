//! Backend trait and the shared commit planner

use crate::{
    document::{DocKey, Document, StoredDocument, WriteSet},
    error::{Error, Result},
    query::Query,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// A document database backend
///
/// Backends only need point reads, collection scans and an atomic
/// conditional commit; transactions and batches are layered on top.
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug {
    /// Read one document
    async fn get(&self, key: &DocKey) -> Result<Option<Document>>;

    /// Run a collection query
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Atomically verify preconditions and apply every write, or nothing
    async fn commit(&self, writes: WriteSet) -> Result<()>;
}

/// Check preconditions against current state and fold the writes into
/// final per-key bodies (`None` = delete).
///
/// Callers must hold their commit lock while calling this and while
/// persisting the result.
pub(crate) fn plan_commit<F>(writes: &WriteSet, mut load: F) -> Result<BTreeMap<DocKey, Option<Value>>>
where
    F: FnMut(&DocKey) -> Result<Option<StoredDocument>>,
{
    for (key, expected) in &writes.preconditions {
        let actual = load(key)?.map_or(0, |stored| stored.version);
        if actual != *expected {
            return Err(Error::Aborted(format!(
                "{} changed (read version {}, now {})",
                key, expected, actual
            )));
        }
    }

    let mut staged: BTreeMap<DocKey, Option<Value>> = BTreeMap::new();
    for op in &writes.ops {
        let key = op.key();
        let current = match staged.get(key) {
            Some(body) => body.clone(),
            None => load(key)?.map(|stored| stored.data),
        };
        let next = op.apply(current)?;
        staged.insert(key.clone(), next);
    }
    Ok(staged)
}
