//! Configuration for the document store

use crate::{
    error::{Error, Result},
    memory::MemoryStore,
    store::DocumentStore,
    transaction::{Store, DEFAULT_MAX_ATTEMPTS},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local, lost on restart
    Memory,
    /// Persistent RocksDB (requires the `rocksdb` feature)
    Rocksdb,
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "rocksdb" => Ok(Backend::Rocksdb),
            other => Err(Error::Config(format!("Unknown store backend: {}", other))),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: Backend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Attempts per optimistic transaction before giving up
    pub max_transaction_attempts: u32,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            data_dir: PathBuf::from("./data/rewards"),
            max_transaction_attempts: DEFAULT_MAX_ATTEMPTS,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl StoreConfig {
    /// Open the configured backend and wrap it in a [`Store`]
    pub fn open(&self) -> Result<Store> {
        let backend: Arc<dyn DocumentStore> = match self.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            #[cfg(feature = "rocksdb")]
            Backend::Rocksdb => Arc::new(crate::rocks::RocksStore::open(self)?),
            #[cfg(not(feature = "rocksdb"))]
            Backend::Rocksdb => {
                return Err(Error::Config(
                    "rocksdb backend requested but the `rocksdb` feature is disabled".to_string(),
                ))
            }
        };
        tracing::info!(backend = ?self.backend, "Document store opened");
        Ok(Store::new(backend).with_max_attempts(self.max_transaction_attempts))
    }
}
