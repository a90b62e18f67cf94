//! # bach-db
//!
//! Transactional table access layer for BachLedger.
//!
//! This crate provides:
//! - The storage adapter contract every embedded engine implements
//! - A transaction broker that fans transaction outcomes out to table accessors
//! - Typed per-table accessors with a size cache tied to transaction outcome
//! - Fixed-layout and self-describing value codecs
//! - An in-memory engine

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accessor;
pub mod adapter;
pub mod bridge;
pub mod codec;
pub mod error;
pub mod exclusive;
pub mod key;
pub mod memory;
pub mod pending;

pub use accessor::{FixedLayoutAccessor, KeyValueAccessor, SerializableAccessor};
pub use adapter::{DbAdapter, DbVisitor, TableId, TX_READ_ONLY, TX_READ_WRITE};
pub use bridge::{DbBridge, WriteTxNotificationReceiver};
pub use codec::{FixedLayout, FixedLayoutCodec, SelfDescribingCodec, ValueCodec};
pub use error::{DbError, DbResult};
pub use exclusive::ExclusiveAccess;
pub use key::TableKey;
pub use memory::MemoryAdapter;
pub use pending::{reader_view, write_route, PendingTable, PendingWrites, Staged, WriteRoute};
