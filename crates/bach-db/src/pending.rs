//! Staged writes of an open transaction
//!
//! Engines keep committed data in their own store and stage the writes of
//! the active transaction here. Reads issued by the owning thread look at the
//! staged view first; commit applies it, abort drops it.

use crate::adapter::TableId;
use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ThreadId};

/// What a transaction has staged for a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staged<'a> {
    /// Key was written in this transaction
    Value(&'a [u8]),
    /// Key was erased, or its table cleared, in this transaction
    Erased,
    /// Transaction did not touch the key; fall back to committed data
    Untouched,
}

/// Staged writes for one table
#[derive(Debug, Default, Clone)]
pub struct PendingTable {
    cleared: bool,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl PendingTable {
    /// Whether the table was cleared in this transaction
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Look up the staged state of a key
    pub fn lookup(&self, key: &[u8]) -> Staged<'_> {
        match self.writes.get(key) {
            Some(Some(value)) => Staged::Value(value),
            Some(None) => Staged::Erased,
            None if self.cleared => Staged::Erased,
            None => Staged::Untouched,
        }
    }

    /// Stage a put
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
    }

    /// Stage an erase
    pub fn erase(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    /// Stage a clear; drops every earlier staged write
    pub fn clear(&mut self) {
        self.cleared = true;
        self.writes.clear();
    }

    /// Staged writes in key order, `None` marking an erase
    pub fn writes(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.writes
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }

    /// Entry count seen through this transaction, given the committed count
    /// and a membership test against committed data
    pub fn adjusted_size(&self, committed: u64, mut committed_contains: impl FnMut(&[u8]) -> bool) -> u64 {
        if self.cleared {
            return self.writes.values().filter(|v| v.is_some()).count() as u64;
        }
        let mut size = committed;
        for (key, value) in &self.writes {
            match (value.is_some(), committed_contains(key)) {
                (true, false) => size += 1,
                (false, true) => size = size.saturating_sub(1),
                _ => {}
            }
        }
        size
    }

    /// Overlay staged writes on committed entries, keeping key order
    pub fn merge(&self, committed: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut view: BTreeMap<Vec<u8>, Vec<u8>> = if self.cleared {
            BTreeMap::new()
        } else {
            committed.into_iter().collect()
        };
        for (key, value) in &self.writes {
            match value {
                Some(value) => {
                    view.insert(key.clone(), value.clone());
                }
                None => {
                    view.remove(key);
                }
            }
        }
        view.into_iter().collect()
    }
}

/// The staged state of the single active transaction
#[derive(Debug)]
pub struct PendingWrites {
    owner: ThreadId,
    read_only: bool,
    tables: HashMap<TableId, PendingTable>,
}

impl PendingWrites {
    /// Start staging on behalf of the current thread
    pub fn new(read_only: bool) -> Self {
        Self {
            owner: thread::current().id(),
            read_only,
            tables: HashMap::new(),
        }
    }

    /// Thread that began the transaction
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Whether the transaction was begun read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the calling thread owns the transaction
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner == thread::current().id()
    }

    /// Staged writes for a table, if any
    pub fn table(&self, table: TableId) -> Option<&PendingTable> {
        self.tables.get(&table)
    }

    /// Staged writes for a table, created on first use
    pub fn table_mut(&mut self, table: TableId) -> &mut PendingTable {
        self.tables.entry(table).or_default()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Consume into per-table staged writes
    pub fn into_tables(self) -> impl Iterator<Item = (TableId, PendingTable)> {
        self.tables.into_iter()
    }
}

/// Where an engine must send a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    /// No transaction open; apply to committed data immediately
    Direct,
    /// Stage in the active transaction
    Staged,
    /// Decline: read-only transaction, or another thread owns the transaction
    Declined,
}

/// Decide how a write issued by the current thread is applied
pub fn write_route(pending: Option<&PendingWrites>, op: &'static str) -> WriteRoute {
    match pending {
        None => WriteRoute::Direct,
        Some(p) if !p.is_owned_by_current_thread() => {
            tracing::warn!(op, owner = ?p.owner(), "write declined: transaction owned by another thread");
            WriteRoute::Declined
        }
        Some(p) if p.is_read_only() => {
            tracing::warn!(op, "write declined: read-only transaction");
            WriteRoute::Declined
        }
        Some(_) => WriteRoute::Staged,
    }
}

/// Staged writes visible to a reader on the current thread
pub fn reader_view(pending: Option<&PendingWrites>, table: TableId) -> Option<&PendingTable> {
    pending
        .filter(|p| p.is_owned_by_current_thread())
        .and_then(|p| p.table(table))
}
