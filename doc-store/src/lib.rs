//! # Document Store
//!
//! Firestore-shaped document database adapter used by the rewards backend.
//!
//! # Architecture
//!
//! - **Backends**: [`MemoryStore`] and, behind the `rocksdb` feature,
//!   `RocksStore`. Both implement [`DocumentStore`]: point reads,
//!   collection scans and one atomic conditional commit.
//! - **Writes**: whole-document `Set`, `Create`, merge `Update` with
//!   per-field [`FieldOp`]s, and `Delete`, grouped into a [`WriteSet`].
//! - **Batches**: [`Batch`] commits a write set with no preconditions.
//! - **Transactions**: [`Store::run_transaction`] re-runs a body until its
//!   read set is still current at commit time, up to a retry budget.
//!
//! # Invariants
//!
//! - A commit applies all of its writes or none of them
//! - Every committed write stamps a strictly larger version
//! - A transaction commits only if every document it read is unchanged

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod query;
#[cfg(feature = "rocksdb")]
pub mod rocks;
pub mod store;
pub mod transaction;

pub use config::{Backend, RocksDBConfig, StoreConfig};
pub use document::{new_id, DocKey, Document, FieldOp, Patch, Record, Version, WriteOp, WriteSet};
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use query::{Direction, Query};
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;
pub use store::DocumentStore;
pub use transaction::{Batch, Store, Transaction, DEFAULT_MAX_ATTEMPTS};
