//! Store handle, atomic batches and optimistic transactions
//!
//! A [`Transaction`] records the version of every document it reads and
//! buffers its writes. On commit the versions become preconditions; if any
//! document changed in the meantime the backend aborts and
//! [`Store::run_transaction`] re-runs the body against fresh reads.

use crate::{
    document::{DocKey, Document, Patch, Record, Version, WriteOp, WriteSet},
    error::{Error, Result},
    query::Query,
    store::DocumentStore,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default number of attempts before a conflicting transaction gives up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Cloneable handle over a backend
#[derive(Debug, Clone)]
pub struct Store {
    backend: Arc<dyn DocumentStore>,
    max_attempts: u32,
}

impl Store {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the transaction retry budget (at least one attempt)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn DocumentStore> {
        &self.backend
    }

    /// Read one document
    pub async fn get(&self, key: &DocKey) -> Result<Option<Document>> {
        self.backend.get(key).await
    }

    /// Read and decode a typed record
    pub async fn get_record<T: Record>(&self, id: &str) -> Result<Option<T>> {
        match self.backend.get(&T::key(id)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Run a query
    pub async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.backend.query(query).await
    }

    /// Run a query and decode every result
    pub async fn query_records<T: Record>(&self, query: &Query) -> Result<Vec<T>> {
        self.backend
            .query(query)
            .await?
            .iter()
            .map(Document::decode)
            .collect()
    }

    /// Replace a document
    pub async fn set<T: Serialize + ?Sized>(&self, key: DocKey, value: &T) -> Result<()> {
        let mut batch = self.batch();
        batch.set(key, value)?;
        batch.commit().await
    }

    /// Merge into an existing document
    pub async fn update(&self, key: DocKey, patch: Patch) -> Result<()> {
        let mut batch = self.batch();
        batch.update(key, patch);
        batch.commit().await
    }

    /// Delete a document
    pub async fn delete(&self, key: DocKey) -> Result<()> {
        let mut batch = self.batch();
        batch.delete(key);
        batch.commit().await
    }

    /// Start an unconditional atomic batch
    pub fn batch(&self) -> Batch {
        Batch {
            backend: self.backend.clone(),
            ops: Vec::new(),
        }
    }

    /// Run `body` in an optimistic transaction, retrying on conflict
    ///
    /// The body may run several times and must not have side effects
    /// outside the transaction. Errors returned by the body are passed
    /// through untouched; a conflict after the last attempt surfaces as
    /// [`Error::Aborted`] converted into `E`.
    pub async fn run_transaction<T, E, F, Fut>(&self, mut body: F) -> std::result::Result<T, E>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let tx = Transaction::new(self.backend.clone());
            let value = body(tx.clone()).await?;
            match self.backend.commit(tx.into_write_set()).await {
                Ok(()) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %err, "Transaction conflict, retrying");
                    let backoff = rand::thread_rng().gen_range(1..=5 * u64::from(attempt));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => {
                    if err.is_retryable() {
                        tracing::warn!(attempt, error = %err, "Transaction retries exhausted");
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

/// Unconditional atomic write batch
#[derive(Debug)]
pub struct Batch {
    backend: Arc<dyn DocumentStore>,
    ops: Vec<WriteOp>,
}

impl Batch {
    /// Replace a document
    pub fn set<T: Serialize + ?Sized>(&mut self, key: DocKey, value: &T) -> Result<()> {
        let data = serde_json::to_value(value)?;
        self.ops.push(WriteOp::Set { key, data });
        Ok(())
    }

    /// Merge into an existing document; the commit fails if it is missing
    pub fn update(&mut self, key: DocKey, patch: Patch) {
        self.ops.push(WriteOp::Update { key, patch });
    }

    /// Delete a document
    pub fn delete(&mut self, key: DocKey) {
        self.ops.push(WriteOp::Delete { key });
    }

    /// Number of queued writes
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every queued write atomically
    pub async fn commit(self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.backend
            .commit(WriteSet {
                preconditions: Vec::new(),
                ops: self.ops,
            })
            .await
    }
}

#[derive(Debug, Default)]
struct TxState {
    reads: BTreeMap<DocKey, Version>,
    ops: Vec<WriteOp>,
}

/// Handle passed to transaction bodies
///
/// Clones share the same read set and write buffer.
#[derive(Debug, Clone)]
pub struct Transaction {
    backend: Arc<dyn DocumentStore>,
    state: Arc<Mutex<TxState>>,
}

impl Transaction {
    fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(TxState::default())),
        }
    }

    /// First observed version wins; a later, different observation makes
    /// the commit precondition fail.
    fn record_read(&self, key: &DocKey, version: Version) {
        self.state.lock().reads.entry(key.clone()).or_insert(version);
    }

    /// Read a document and track its version
    pub async fn get(&self, key: &DocKey) -> Result<Option<Document>> {
        let doc = self.backend.get(key).await?;
        self.record_read(key, doc.as_ref().map_or(0, |d| d.version));
        Ok(doc)
    }

    /// Read and decode a typed record
    pub async fn get_record<T: Record>(&self, id: &str) -> Result<Option<T>> {
        match self.get(&T::key(id)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Query and track the version of every returned document
    ///
    /// Documents inserted into the collection after the query are not
    /// detected.
    pub async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let docs = self.backend.query(query).await?;
        for doc in &docs {
            self.record_read(&DocKey::new(query.collection.clone(), doc.id.clone()), doc.version);
        }
        Ok(docs)
    }

    /// Replace a document
    pub fn set<T: Serialize + ?Sized>(&self, key: DocKey, value: &T) -> Result<()> {
        let data = serde_json::to_value(value)?;
        self.state.lock().ops.push(WriteOp::Set { key, data });
        Ok(())
    }

    /// Replace a typed record
    pub fn set_record<T: Record>(&self, id: &str, record: &T) -> Result<()> {
        self.set(T::key(id), record)
    }

    /// Create a document that must not exist yet
    pub fn create<T: Serialize + ?Sized>(&self, key: DocKey, value: &T) -> Result<()> {
        let data = serde_json::to_value(value)?;
        self.state.lock().ops.push(WriteOp::Create { key, data });
        Ok(())
    }

    /// Merge into an existing document
    pub fn update(&self, key: DocKey, patch: Patch) {
        self.state.lock().ops.push(WriteOp::Update { key, patch });
    }

    /// Merge into an existing typed record
    pub fn update_record<T: Record>(&self, id: &str, patch: Patch) {
        self.update(T::key(id), patch)
    }

    /// Merge, creating the document if missing
    pub fn merge(&self, key: DocKey, patch: Patch) {
        self.state.lock().ops.push(WriteOp::Merge { key, patch });
    }

    /// Delete a document
    pub fn delete(&self, key: DocKey) {
        self.state.lock().ops.push(WriteOp::Delete { key });
    }

    fn into_write_set(self) -> WriteSet {
        let state = std::mem::take(&mut *self.state.lock());
        WriteSet {
            preconditions: state.reads.into_iter().collect(),
            ops: state.ops,
        }
    }
}
