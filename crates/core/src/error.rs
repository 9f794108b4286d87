//! Error types for the BRI database
//!
//! One unified error enum is shared by every crate in the workspace.
//! We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! ## Error Categories
//!
//! - **Shape**: bad collection names, malformed ids, type mismatches
//! - **Selection**: missing selectors, targets that were not found
//! - **Validation**: duplicate adds, validator-hook rejections
//! - **Storage**: WAL/fsync/cold-tier I/O failures, serialization,
//!   corruption detected during recovery
//! - **Transaction**: operations on a transaction that is not pending
//!
//! Background failures (snapshot ticks, cold-tier flushes) are logged and
//! retried rather than surfaced through this type; see the engine crate.

use std::io;
use thiserror::Error;

/// Result type alias for BRI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all BRI operations
#[derive(Debug, Error)]
pub enum Error {
    /// Collection name failed the naming grammar
    ///
    /// Legal names are lowercase alphanumeric stems that do not end in `s`,
    /// optionally followed by a single `S` group marker (`user`, `x1`,
    /// `userS`). `users`, `User`, `user-name` and the empty string are all
    /// rejected.
    #[error("bad collection name: {name:?}")]
    BadCollectionName {
        /// The offending name
        name: String,
    },

    /// An id was not of the form `TYPE_token`
    #[error("bad id: {id:?} is not of the form TYPE_token")]
    BadId {
        /// The offending id
        id: String,
    },

    /// The operation's collection type and the id's type prefix disagree
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type derived from the operation's collection name
        expected: String,
        /// Type extracted from the id
        actual: String,
    },

    /// `undefined` was passed where a selector is required
    #[error("trying to pass 'undefined' as a selector")]
    MissingSelector,

    /// The target of a `del`/`set` does not exist (or is tombstoned)
    #[error("{key} was not found")]
    NotFound {
        /// Key or id that was looked up
        key: String,
    },

    /// `add` was called with data that already carries an `$ID`
    #[error("cannot add a document that already has an id ({id})")]
    DuplicateAdd {
        /// The pre-existing id
        id: String,
    },

    /// A validator middleware rejected the document
    #[error("validator rejected the operation: {message}")]
    ValidatorRejection {
        /// The validator's error string
        message: String,
    },

    /// Low-level storage failure (WAL append, fsync, cold-tier I/O)
    #[error("storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to serialize or deserialize data
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// Data integrity check failed
    #[error("corruption detected: {message}")]
    Corruption {
        /// Description of the corruption
        message: String,
    },

    /// A transaction verb was applied to a transaction that is not pending
    #[error("transaction not pending (already {state})")]
    TxnState {
        /// Current state of the transaction
        state: String,
    },
}

impl Error {
    /// Create a `BadCollectionName` error
    pub fn bad_collection_name(name: impl Into<String>) -> Self {
        Error::BadCollectionName { name: name.into() }
    }

    /// Create a `BadId` error
    pub fn bad_id(id: impl Into<String>) -> Self {
        Error::BadId { id: id.into() }
    }

    /// Create a `TypeMismatch` error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a `NotFound` error
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Create a `Storage` error without an underlying source
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Storage` error wrapping an underlying error
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `Serialization` error
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Create a `Corruption` error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Create a `TxnState` error
    pub fn txn_state(state: impl Into<String>) -> Self {
        Error::TxnState {
            state: state.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this is a validation/shape error
    ///
    /// Validation errors indicate bad input. Retrying cannot help; the
    /// input must be corrected.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::BadCollectionName { .. }
                | Error::BadId { .. }
                | Error::TypeMismatch { .. }
                | Error::MissingSelector
                | Error::DuplicateAdd { .. }
                | Error::ValidatorRejection { .. }
        )
    }

    /// Check if this is a storage-layer error
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Storage { .. } | Error::Serialization { .. } | Error::Corruption { .. }
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Storage {
            message: format!("I/O error: {}", e),
            source: Some(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization {
            message: format!("JSON error: {}", e),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization {
            message: e.to_string(),
        }
    }
}
