//! RocksDB backend
//!
//! # Column Families
//!
//! - `documents` - Document bodies (key: collection || 0x00 || id)
//! - `meta` - Store metadata (commit sequence)

use crate::{
    config::StoreConfig,
    document::{DocKey, Document, StoredDocument, Version, WriteSet},
    error::{Error, Result},
    query::Query,
    store::{plan_commit, DocumentStore},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_DOCUMENTS: &str = "documents";
const CF_META: &str = "meta";

const SEQUENCE_KEY: &[u8] = b"sequence";

/// Persistent document store
pub struct RocksStore {
    db: Arc<DB>,
    /// Serializes commits; holds the last issued version
    commit_lock: Mutex<Version>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_DOCUMENTS, Self::cf_options_documents()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let sequence = {
            let meta = db
                .cf_handle(CF_META)
                .ok_or_else(|| Error::Storage(format!("Column family not found: {}", CF_META)))?;
            match db.get_cf(meta, SEQUENCE_KEY)? {
                Some(bytes) => decode_sequence(&bytes)?,
                None => 0,
            }
        };

        tracing::info!(path = %path.display(), sequence, "RocksDB store opened");

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(sequence),
        })
    }

    fn cf_options_documents() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family not found: {}", name)))
    }

    fn load(&self, key: &DocKey) -> Result<Option<StoredDocument>> {
        let cf = self.cf_handle(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, encode_key(key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn collection_prefix(collection: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(collection.len() + 1);
    prefix.extend_from_slice(collection.as_bytes());
    prefix.push(0);
    prefix
}

fn encode_key(key: &DocKey) -> Vec<u8> {
    let mut bytes = collection_prefix(&key.collection);
    bytes.extend_from_slice(key.id.as_bytes());
    bytes
}

fn decode_sequence(bytes: &[u8]) -> Result<Version> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage("Corrupt commit sequence".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

#[async_trait]
impl DocumentStore for RocksStore {
    async fn get(&self, key: &DocKey) -> Result<Option<Document>> {
        Ok(self.load(key)?.map(|stored| Document {
            id: key.id.clone(),
            version: stored.version,
            data: stored.data,
        }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let cf = self.cf_handle(CF_DOCUMENTS)?;
        let prefix = collection_prefix(&query.collection);
        let mut candidates = Vec::new();

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| Error::Storage(format!("Invalid document key: {}", e)))?;
            let stored: StoredDocument = serde_json::from_slice(&value)?;
            candidates.push(Document {
                id,
                version: stored.version,
                data: stored.data,
            });
        }

        Ok(query.execute(candidates))
    }

    async fn commit(&self, writes: WriteSet) -> Result<()> {
        if writes.is_empty() && writes.preconditions.is_empty() {
            return Ok(());
        }

        let mut sequence = self.commit_lock.lock();
        let staged = plan_commit(&writes, |key| self.load(key))?;
        let version = *sequence + 1;

        let documents = self.cf_handle(CF_DOCUMENTS)?;
        let meta = self.cf_handle(CF_META)?;
        let mut batch = WriteBatch::default();
        for (key, body) in &staged {
            match body {
                Some(data) => {
                    let stored = StoredDocument {
                        version,
                        data: data.clone(),
                    };
                    batch.put_cf(documents, encode_key(key), serde_json::to_vec(&stored)?);
                }
                None => batch.delete_cf(documents, encode_key(key)),
            }
        }
        batch.put_cf(meta, SEQUENCE_KEY, version.to_be_bytes());
        self.db.write(batch)?;
        *sequence = version;

        tracing::debug!(version, writes = writes.ops.len(), "Commit applied");
        Ok(())
    }
}
