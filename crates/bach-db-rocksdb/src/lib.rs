//! # bach-db-rocksdb
//!
//! RocksDB engine for the BachLedger table access layer.
//!
//! Every table is a column family. Writes of the active transaction are
//! staged in memory and applied with a single atomic write batch on commit.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod config;
pub mod error;

pub use adapter::RocksAdapter;
pub use config::DbConfig;
pub use error::{RocksError, RocksResult};
