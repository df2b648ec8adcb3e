//! Error types for the document store

use crate::document::DocKey;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Document store errors
#[derive(Error, Debug)]
pub enum Error {
    /// Backend failure (RocksDB, poisoned state)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Document (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Conditional update against a missing document
    #[error("Document not found: {0}")]
    NotFound(DocKey),

    /// Create against an existing document
    #[error("Document already exists: {0}")]
    AlreadyExists(DocKey),

    /// A document read inside a transaction changed before commit
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// Document body is not a JSON object, or a field op does not apply
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry of the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
