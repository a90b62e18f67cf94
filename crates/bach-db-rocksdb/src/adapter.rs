//! RocksDB implementation of [`DbAdapter`]

use crate::config::DbConfig;
use crate::error::{RocksError, RocksResult};
use bach_db::{reader_view, write_route, DbAdapter, DbVisitor, PendingWrites, Staged, TableId, WriteRoute};
use parking_lot::{Mutex, RwLock};
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded, Options, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

type RocksDB = DBWithThreadMode<MultiThreaded>;

/// Column family a table is stored in; ids index `names`
#[derive(Default)]
struct TableRegistry {
    names: Vec<String>,
    ids: HashMap<String, TableId>,
}

impl TableRegistry {
    fn name(&self, table: TableId) -> RocksResult<&str> {
        self.names
            .get(table as usize)
            .map(String::as_str)
            .ok_or(RocksError::UnknownTable(table))
    }

    fn register(&mut self, name: &str) -> TableId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len() as TableId;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }
}

/// RocksDB engine
///
/// `open` takes the database directory. Table ids stay stable across
/// `close`/`open` cycles of the same adapter.
///
/// Lock order: `db`, `tables`, `tx`.
pub struct RocksAdapter {
    config: DbConfig,
    db: RwLock<Option<RocksDB>>,
    tables: RwLock<TableRegistry>,
    tx: Mutex<Option<PendingWrites>>,
}

impl RocksAdapter {
    /// Create a closed engine
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            db: RwLock::new(None),
            tables: RwLock::new(TableRegistry::default()),
            tx: Mutex::new(None),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Whether a transaction is active
    pub fn in_transaction(&self) -> bool {
        self.tx.lock().is_some()
    }

    fn open_db(&self, path: &Path) -> RocksResult<RocksDB> {
        let opts = self.config.db_options();

        // column families already on disk, plus every table opened earlier
        let mut cfs = if path.join("CURRENT").exists() {
            RocksDB::list_cf(&opts, path)?
        } else {
            Vec::new()
        };
        for name in &self.tables.read().names {
            if !cfs.contains(name) {
                cfs.push(name.clone());
            }
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cfs
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        Ok(RocksDB::open_cf_descriptors(&opts, path, cf_descriptors)?)
    }

    fn column_family<'a>(
        &self,
        db: &'a RocksDB,
        registry: &TableRegistry,
        table: TableId,
    ) -> RocksResult<Arc<BoundColumnFamily<'a>>> {
        let name = registry.name(table)?;
        db.cf_handle(name).ok_or(RocksError::UnknownTable(table))
    }

    fn committed_entries(db: &RocksDB, cf: &Arc<BoundColumnFamily<'_>>) -> RocksResult<Vec<(Vec<u8>, Vec<u8>)>> {
        db.iterator_cf(cf, IteratorMode::Start)
            .map(|item| {
                let (key, value) = item?;
                Ok((key.into_vec(), value.into_vec()))
            })
            .collect()
    }

    fn committed_len(db: &RocksDB, cf: &Arc<BoundColumnFamily<'_>>) -> RocksResult<u64> {
        let mut len = 0;
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            len += 1;
        }
        Ok(len)
    }

    fn delete_all(db: &RocksDB, cf: &Arc<BoundColumnFamily<'_>>, batch: &mut WriteBatch) -> RocksResult<()> {
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        Ok(())
    }

    fn try_get(&self, table: TableId, key: &[u8]) -> RocksResult<Option<Vec<u8>>> {
        let db_guard = self.db.read();
        let db = db_guard.as_ref().ok_or(RocksError::NotOpen)?;
        let registry = self.tables.read();
        let cf = self.column_family(db, &registry, table)?;

        let tx = self.tx.lock();
        if let Some(staged) = reader_view(tx.as_ref(), table) {
            match staged.lookup(key) {
                Staged::Value(value) => return Ok(Some(value.to_vec())),
                Staged::Erased => return Ok(None),
                Staged::Untouched => {}
            }
        }
        Ok(db.get_cf(&cf, key)?)
    }

    fn try_table_size(&self, table: TableId) -> RocksResult<u64> {
        let db_guard = self.db.read();
        let db = db_guard.as_ref().ok_or(RocksError::NotOpen)?;
        let registry = self.tables.read();
        let cf = self.column_family(db, &registry, table)?;

        let tx = self.tx.lock();
        let Some(staged) = reader_view(tx.as_ref(), table) else {
            return Self::committed_len(db, &cf);
        };
        if staged.is_cleared() {
            return Ok(staged.adjusted_size(0, |_| false));
        }

        let committed = Self::committed_len(db, &cf)?;
        let mut lookup_error = None;
        let size = staged.adjusted_size(committed, |key| match db.get_pinned_cf(&cf, key) {
            Ok(found) => found.is_some(),
            Err(e) => {
                lookup_error = Some(e);
                false
            }
        });
        match lookup_error {
            Some(e) => Err(e.into()),
            None => Ok(size),
        }
    }

    fn try_visit_entries(&self, table: TableId) -> RocksResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let db_guard = self.db.read();
        let db = db_guard.as_ref().ok_or(RocksError::NotOpen)?;
        let registry = self.tables.read();
        let cf = self.column_family(db, &registry, table)?;

        let tx = self.tx.lock();
        match reader_view(tx.as_ref(), table) {
            Some(staged) if staged.is_cleared() => Ok(staged.merge(Vec::new())),
            Some(staged) => Ok(staged.merge(Self::committed_entries(db, &cf)?)),
            None => Self::committed_entries(db, &cf),
        }
    }

    /// Apply a write directly, or stage it in the active transaction
    fn try_write(
        &self,
        table: TableId,
        op: &'static str,
        direct: impl FnOnce(&RocksDB, &Arc<BoundColumnFamily<'_>>) -> RocksResult<()>,
        staged: impl FnOnce(&mut bach_db::PendingTable),
    ) -> RocksResult<bool> {
        let db_guard = self.db.read();
        let db = db_guard.as_ref().ok_or(RocksError::NotOpen)?;
        let registry = self.tables.read();
        let cf = self.column_family(db, &registry, table)?;

        let mut tx = self.tx.lock();
        match write_route(tx.as_ref(), op) {
            WriteRoute::Declined => Ok(false),
            WriteRoute::Direct => {
                direct(db, &cf)?;
                Ok(true)
            }
            WriteRoute::Staged => match tx.as_mut() {
                Some(pending) => {
                    staged(pending.table_mut(table));
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    fn try_commit(&self) -> RocksResult<bool> {
        let db_guard = self.db.read();
        let db = db_guard.as_ref().ok_or(RocksError::NotOpen)?;
        let registry = self.tables.read();

        let mut tx = self.tx.lock();
        match tx.as_ref() {
            None => {
                tracing::warn!("commit_transaction without an active transaction");
                return Ok(false);
            }
            Some(active) if !active.is_owned_by_current_thread() => {
                tracing::warn!(owner = ?active.owner(), "commit_transaction from a foreign thread");
                return Ok(false);
            }
            Some(_) => {}
        }
        // a failed commit is not retried; the staged writes are gone either way
        let Some(pending) = tx.take() else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        for (table, staged) in pending.into_tables() {
            let cf = self.column_family(db, &registry, table)?;
            if staged.is_cleared() {
                Self::delete_all(db, &cf, &mut batch)?;
            }
            for (key, value) in staged.writes() {
                match value {
                    Some(value) => batch.put_cf(&cf, key, value),
                    None => batch.delete_cf(&cf, key),
                }
            }
        }

        let ops = batch.len();
        db.write(batch)?;
        tracing::debug!(ops, "transaction committed");
        Ok(true)
    }
}

impl Default for RocksAdapter {
    fn default() -> Self {
        Self::new(DbConfig::default())
    }
}

/// Log an engine error and collapse it for the boolean contract
fn logged<T>(op: &'static str, result: RocksResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(op, error = %e, "rocksdb operation failed");
            None
        }
    }
}

impl DbAdapter for RocksAdapter {
    fn open(&self, name: &str) -> bool {
        let mut db_guard = self.db.write();
        if db_guard.is_some() {
            tracing::warn!(path = name, "rocksdb already open");
            return false;
        }
        match logged("open", self.open_db(Path::new(name))) {
            Some(db) => {
                *db_guard = Some(db);
                tracing::info!(path = name, "rocksdb opened");
                true
            }
            None => false,
        }
    }

    fn close(&self) -> bool {
        let mut db_guard = self.db.write();
        let Some(db) = db_guard.take() else {
            return false;
        };
        if self.tx.lock().take().is_some() {
            tracing::warn!("closing with an open transaction, staged writes discarded");
        }
        tracing::info!(path = %db.path().display(), "rocksdb closed");
        true
    }

    fn open_table(&self, name: &str) -> Option<TableId> {
        let db_guard = self.db.read();
        let db = db_guard.as_ref()?;
        // registry lock serializes check-and-create of the column family
        let mut registry = self.tables.write();
        if db.cf_handle(name).is_none() {
            logged("create_cf", db.create_cf(name, &Options::default()).map_err(RocksError::from))?;
        }
        let id = registry.register(name);
        tracing::debug!(table = name, id, "table opened");
        Some(id)
    }

    fn clear_table(&self, table: TableId) -> bool {
        let result = self.try_write(
            table,
            "clear_table",
            |db, cf| {
                let mut batch = WriteBatch::default();
                Self::delete_all(db, cf, &mut batch)?;
                Ok(db.write(batch)?)
            },
            |staged| staged.clear(),
        );
        logged("clear_table", result).unwrap_or(false)
    }

    fn get_table_size(&self, table: TableId) -> u64 {
        logged("get_table_size", self.try_table_size(table)).unwrap_or(0)
    }

    fn begin_transaction(&self, read_only: bool) -> bool {
        let db_guard = self.db.read();
        if db_guard.is_none() {
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
        logged("commit_transaction", self.try_commit()).unwrap_or(false)
    }

    fn abort_transaction(&self) {
        if self.tx.lock().take().is_some() {
            tracing::debug!("transaction aborted");
        }
    }

    fn get(&self, table: TableId, key: &[u8]) -> Option<Vec<u8>> {
        logged("get", self.try_get(table, key)).flatten()
    }

    fn set(&self, table: TableId, key: &[u8], value: &[u8]) -> bool {
        let result = self.try_write(
            table,
            "set",
            |db, cf| Ok(db.put_cf(cf, key, value)?),
            |staged| staged.put(key, value),
        );
        logged("set", result).unwrap_or(false)
    }

    fn erase(&self, table: TableId, key: &[u8]) -> bool {
        let result = self.try_write(
            table,
            "erase",
            |db, cf| Ok(db.delete_cf(cf, key)?),
            |staged| staged.erase(key),
        );
        logged("erase", result).unwrap_or(false)
    }

    fn visit_table(&self, table: TableId, visitor: &mut dyn DbVisitor) -> bool {
        let Some(entries) = logged("visit_table", self.try_visit_entries(table)) else {
            return false;
        };
        for (i, (key, value)) in entries.iter().enumerate() {
            if !visitor.on_visit_db_item(i, key, value) {
                break;
            }
        }
        true
    }
}
