//! In-memory engine
//!
//! Volatile implementation of [`DbAdapter`]. Data lives for the adapter's
//! lifetime and survives `close`/`open` cycles; it is never written to disk.

use crate::adapter::{DbAdapter, DbVisitor, TableId};
use crate::pending::{reader_view, write_route, PendingWrites, Staged, WriteRoute};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
struct MemoryState {
    name: Option<String>,
    names: HashMap<String, TableId>,
    tables: Vec<Table>,
}

impl MemoryState {
    fn is_open(&self) -> bool {
        self.name.is_some()
    }

    fn table(&self, table: TableId) -> Option<&Table> {
        if !self.is_open() {
            return None;
        }
        self.tables.get(table as usize)
    }
}

/// In-memory database engine
#[derive(Default)]
pub struct MemoryAdapter {
    state: RwLock<MemoryState>,
    tx: Mutex<Option<PendingWrites>>,
}

impl MemoryAdapter {
    /// Create a closed, empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transaction is active
    pub fn in_transaction(&self) -> bool {
        self.tx.lock().is_some()
    }

    fn write(&self, table: TableId, op: &'static str, apply: impl FnOnce(WriteTarget<'_>)) -> bool {
        let mut state = self.state.write();
        if state.table(table).is_none() {
            tracing::warn!(table, op, "write to unknown table or closed database");
            return false;
        }
        let mut tx = self.tx.lock();
        match write_route(tx.as_ref(), op) {
            WriteRoute::Declined => false,
            WriteRoute::Direct => {
                apply(WriteTarget::Committed(&mut state.tables[table as usize]));
                true
            }
            WriteRoute::Staged => match tx.as_mut() {
                Some(pending) => {
                    apply(WriteTarget::Staged(pending.table_mut(table)));
                    true
                }
                None => false,
            },
        }
    }
}

enum WriteTarget<'a> {
    Committed(&'a mut Table),
    Staged(&'a mut crate::pending::PendingTable),
}

impl DbAdapter for MemoryAdapter {
    fn open(&self, name: &str) -> bool {
        let mut state = self.state.write();
        if let Some(current) = &state.name {
            tracing::warn!(current = %current, "memory database already open");
            return false;
        }
        state.name = Some(name.to_string());
        tracing::info!(name, "memory database opened");
        true
    }

    fn close(&self) -> bool {
        let mut state = self.state.write();
        let Some(name) = state.name.take() else {
            return false;
        };
        if self.tx.lock().take().is_some() {
            tracing::warn!(name = %name, "closing with an open transaction, staged writes discarded");
        }
        tracing::info!(name = %name, "memory database closed");
        true
    }

    fn open_table(&self, name: &str) -> Option<TableId> {
        let mut state = self.state.write();
        if !state.is_open() {
            return None;
        }
        if let Some(id) = state.names.get(name) {
            return Some(*id);
        }
        let id = state.tables.len() as TableId;
        state.tables.push(Table::new());
        state.names.insert(name.to_string(), id);
        tracing::debug!(table = name, id, "table opened");
        Some(id)
    }

    fn clear_table(&self, table: TableId) -> bool {
        self.write(table, "clear_table", |target| match target {
            WriteTarget::Committed(t) => t.clear(),
            WriteTarget::Staged(p) => p.clear(),
        })
    }

    fn get_table_size(&self, table: TableId) -> u64 {
        let state = self.state.read();
        let Some(committed) = state.table(table) else {
            return 0;
        };
        let tx = self.tx.lock();
        match reader_view(tx.as_ref(), table) {
            Some(staged) => staged.adjusted_size(committed.len() as u64, |k| committed.contains_key(k)),
            None => committed.len() as u64,
        }
    }

    fn begin_transaction(&self, read_only: bool) -> bool {
        let state = self.state.read();
        if !state.is_open() {
            return false;
        }
        let mut tx = self.tx.lock();
        if let Some(active) = tx.as_ref() {
            tracing::warn!(owner = ?active.owner(), "begin_transaction declined: transaction already active");
            return false;
        }
        *tx = Some(PendingWrites::new(read_only));
        tracing::debug!(read_only, "transaction started");
        true
    }

    fn commit_transaction(&self) -> bool {
        let mut state = self.state.write();
        let mut tx = self.tx.lock();
        match tx.as_ref() {
            None => {
                tracing::warn!("commit_transaction without an active transaction");
                return false;
            }
            Some(active) if !active.is_owned_by_current_thread() => {
                tracing::warn!(owner = ?active.owner(), "commit_transaction from a foreign thread");
                return false;
            }
            Some(_) => {}
        }
        let Some(pending) = tx.take() else {
            return false;
        };
        for (id, staged) in pending.into_tables() {
            let Some(committed) = state.tables.get_mut(id as usize) else {
                continue;
            };
            if staged.is_cleared() {
                committed.clear();
            }
            for (key, value) in staged.writes() {
                match value {
                    Some(value) => {
                        committed.insert(key.to_vec(), value.to_vec());
                    }
                    None => {
                        committed.remove(key);
                    }
                }
            }
        }
        tracing::debug!("transaction committed");
        true
    }

    fn abort_transaction(&self) {
        if self.tx.lock().take().is_some() {
            tracing::debug!("transaction aborted");
        }
    }

    fn get(&self, table: TableId, key: &[u8]) -> Option<Vec<u8>> {
        let state = self.state.read();
        let committed = state.table(table)?;
        let tx = self.tx.lock();
        if let Some(staged) = reader_view(tx.as_ref(), table) {
            match staged.lookup(key) {
                Staged::Value(value) => return Some(value.to_vec()),
                Staged::Erased => return None,
                Staged::Untouched => {}
            }
        }
        committed.get(key).cloned()
    }

    fn set(&self, table: TableId, key: &[u8], value: &[u8]) -> bool {
        self.write(table, "set", |target| match target {
            WriteTarget::Committed(t) => {
                t.insert(key.to_vec(), value.to_vec());
            }
            WriteTarget::Staged(p) => p.put(key, value),
        })
    }

    fn erase(&self, table: TableId, key: &[u8]) -> bool {
        self.write(table, "erase", |target| match target {
            WriteTarget::Committed(t) => {
                t.remove(key);
            }
            WriteTarget::Staged(p) => p.erase(key),
        })
    }

    fn visit_table(&self, table: TableId, visitor: &mut dyn DbVisitor) -> bool {
        let entries = {
            let state = self.state.read();
            let Some(committed) = state.table(table) else {
                return false;
            };
            let snapshot: Vec<(Vec<u8>, Vec<u8>)> =
                committed.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let tx = self.tx.lock();
            match reader_view(tx.as_ref(), table) {
                Some(staged) => staged.merge(snapshot),
                None => snapshot,
            }
        };

        for (i, (key, value)) in entries.iter().enumerate() {
            if !visitor.on_visit_db_item(i, key, value) {
                break;
            }
        }
        true
    }
}
