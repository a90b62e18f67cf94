//! RocksDB engine error types

use thiserror::Error;

/// Engine errors
///
/// The adapter contract reports failure as `bool`/`Option`, so these are
/// logged at the boundary and only surface from configuration loading.
#[derive(Debug, Error)]
pub enum RocksError {
    /// RocksDB error
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Malformed configuration file
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Unknown table id
    #[error("unknown table: {0}")]
    UnknownTable(u64),

    /// Database not open
    #[error("database not open")]
    NotOpen,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type RocksResult<T> = Result<T, RocksError>;
