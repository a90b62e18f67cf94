//! Database layer error types

use thiserror::Error;

/// Errors surfaced by the broker and table accessors
#[derive(Debug, Error)]
pub enum DbError {
    /// Database not open
    #[error("database not open")]
    NotOpen,

    /// Database already open
    #[error("database already open")]
    AlreadyOpen,

    /// Table could not be opened
    #[error("failed to open table: {0}")]
    TableOpen(String),

    /// The adapter declined an operation
    #[error("adapter declined {0}")]
    Adapter(&'static str),

    /// Stored fixed-layout record has the wrong size
    #[error("size mismatch: expected {expected} bytes, got {got}")]
    SizeMismatch {
        /// Size of the fixed-layout type
        expected: usize,
        /// Number of bytes found in storage
        got: usize,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Commit failed in the storage engine
    #[error("commit_transaction failed")]
    CommitFailed,

    /// Commit issued by a thread that did not begin the transaction
    #[error("transaction owned by another thread")]
    NotTransactionOwner,

    /// Receiver attached twice
    #[error("failed, container already attached")]
    ReceiverAlreadyAttached,

    /// Receiver detached without being attached
    #[error("failed, container has never been attached")]
    ReceiverNotAttached,

    /// Invalid data format
    #[error("invalid data format: {0}")]
    InvalidFormat(String),
}

/// Result type for database layer operations
pub type DbResult<T> = Result<T, DbError>;
