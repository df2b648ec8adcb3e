//! Error types for the rewards backend

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for rewards operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers (HTTP status mapping, retries)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied bad input
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Request conflicts with current state
    Conflict,
    /// Caller may not perform the operation
    Unauthorized,
    /// Retrying the whole operation may succeed
    Transient,
    /// Anything else
    Internal,
}

/// Rewards errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid input, rejected before any store access
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing entity
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("user", "team", ...)
        entity: &'static str,
        /// Requested id
        id: String,
    },

    /// State conflict (already member, team full, wrong run state, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Debit larger than the wallet balance
    #[error("Insufficient balance: have {balance}, need {requested}")]
    InsufficientFunds {
        /// Balance at the time of the attempt
        balance: Decimal,
        /// Requested debit
        requested: Decimal,
    },

    /// Requestor is not allowed to act on the resource
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transaction kept conflicting; safe to retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(doc_store::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::NotFound`]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict(_) | Error::InsufficientFunds { .. } => ErrorKind::Conflict,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Store(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the operation may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<doc_store::Error> for Error {
    fn from(err: doc_store::Error) -> Self {
        match err {
            err if err.is_retryable() => Error::Transient(err.to_string()),
            doc_store::Error::AlreadyExists(key) => {
                Error::Conflict(format!("{} already exists", key))
            }
            doc_store::Error::NotFound(key) => Error::NotFound {
                entity: "document",
                id: key.to_string(),
            },
            other => Error::Store(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(doc_store::Error::Serialization(err))
    }
}
