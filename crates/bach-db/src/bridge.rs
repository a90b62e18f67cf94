//! Transaction broker
//!
//! [`DbBridge`] owns one adapter, drives the single physical transaction and
//! tells every attached table accessor how each write transaction ended, so
//! accessors can keep their caches consistent with the engine.

use crate::adapter::{DbAdapter, DbVisitor, TableId};
use crate::codec::{FixedLayout, FixedLayoutCodec, SelfDescribingCodec, ValueCodec};
use crate::error::{DbError, DbResult};
use crate::key::TableKey;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Receives the outcome of write transactions
///
/// Handlers run synchronously under the broker's registry lock and must not
/// attach or detach receivers.
pub trait WriteTxNotificationReceiver: Send + Sync {
    /// A write transaction was begun by the calling thread
    fn on_write_transaction_begin(&self);
    /// The write transaction was committed
    fn on_write_transaction_commit(&self);
    /// The write transaction was aborted, or its commit failed
    fn on_write_transaction_abort(&self);
}

/// Broker between table accessors and a storage adapter
pub struct DbBridge {
    adapter: Arc<dyn DbAdapter>,
    opened: AtomicBool,
    tx_owner: Mutex<Option<ThreadId>>,
    receivers: Mutex<Vec<Weak<dyn WriteTxNotificationReceiver>>>,
}

impl DbBridge {
    /// Create a broker over `adapter`. The database is not opened.
    pub fn new(adapter: Arc<dyn DbAdapter>) -> Self {
        Self {
            adapter,
            opened: AtomicBool::new(false),
            tx_owner: Mutex::new(None),
            receivers: Mutex::new(Vec::new()),
        }
    }

    /// The shared adapter
    pub fn adapter(&self) -> Arc<dyn DbAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Open the database
    pub fn open(&self, name: &str) -> DbResult<()> {
        if self.is_open() {
            return Err(DbError::AlreadyOpen);
        }
        let opened = self.adapter.open(name);
        self.opened.store(opened, Ordering::SeqCst);
        if !opened {
            tracing::error!(name, "failed to open database");
            return Err(DbError::Adapter("open"));
        }
        Ok(())
    }

    /// Close the database. Returns `false` if it was not open.
    ///
    /// The adapter discards an open transaction on close, so receivers are
    /// told it was aborted.
    pub fn close(&self) -> bool {
        self.opened.store(false, Ordering::SeqCst);
        let closed = self.adapter.close();
        self.tx_owner.lock().take();
        self.notify(|r| r.on_write_transaction_abort());
        closed
    }

    /// Whether the database is open
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DbError::NotOpen)
        }
    }

    // ========== Transactions ==========

    /// Begin a transaction.
    ///
    /// Only a successfully begun write transaction is announced to the
    /// attached receivers; a declined begin leaves them untouched.
    pub fn begin_transaction(&self, read_only: bool) -> DbResult<()> {
        self.ensure_open()?;
        if !self.adapter.begin_transaction(read_only) {
            tracing::warn!(read_only, "begin_transaction declined by adapter");
            return Err(DbError::Adapter("begin_transaction"));
        }
        *self.tx_owner.lock() = Some(thread::current().id());
        if !read_only {
            self.notify(|r| r.on_write_transaction_begin());
        }
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// A commit from a thread other than the one that began the
    /// transaction is refused with [`DbError::NotTransactionOwner`]; the
    /// transaction stays open and nobody is notified.
    ///
    /// A failed commit is not retried. Receivers are told the transaction
    /// was aborted and [`DbError::CommitFailed`] is returned.
    pub fn commit_transaction(&self) -> DbResult<()> {
        self.ensure_open()?;
        {
            let mut owner = self.tx_owner.lock();
            if let Some(id) = *owner {
                if id != thread::current().id() {
                    tracing::warn!(owner = ?id, "commit_transaction from a thread that does not own the transaction");
                    return Err(DbError::NotTransactionOwner);
                }
            }
            *owner = None;
        }
        if !self.adapter.commit_transaction() {
            tracing::error!("commit_transaction failed");
            self.notify(|r| r.on_write_transaction_abort());
            return Err(DbError::CommitFailed);
        }
        self.notify(|r| r.on_write_transaction_commit());
        Ok(())
    }

    /// Abort the active transaction. Receivers are always notified.
    pub fn abort_transaction(&self) {
        self.adapter.abort_transaction();
        self.tx_owner.lock().take();
        self.notify(|r| r.on_write_transaction_abort());
    }

    fn notify(&self, f: impl Fn(&dyn WriteTxNotificationReceiver)) {
        let receivers = self.receivers.lock();
        for receiver in receivers.iter().filter_map(Weak::upgrade) {
            f(receiver.as_ref());
        }
    }

    // ========== Receivers ==========

    /// Attach a receiver. Attaching the same receiver twice is an error.
    pub fn attach(&self, receiver: &Arc<dyn WriteTxNotificationReceiver>) -> DbResult<()> {
        let mut receivers = self.receivers.lock();
        let weak = Arc::downgrade(receiver);
        receivers.retain(|r| r.strong_count() > 0);
        if receivers.iter().any(|r| Weak::ptr_eq(r, &weak)) {
            return Err(DbError::ReceiverAlreadyAttached);
        }
        receivers.push(weak);
        Ok(())
    }

    /// Detach a receiver. Detaching one that is not attached is an error.
    pub fn detach(&self, receiver: &Arc<dyn WriteTxNotificationReceiver>) -> DbResult<()> {
        let mut receivers = self.receivers.lock();
        let weak = Arc::downgrade(receiver);
        let position = receivers
            .iter()
            .position(|r| Weak::ptr_eq(r, &weak))
            .ok_or(DbError::ReceiverNotAttached)?;
        receivers.remove(position);
        Ok(())
    }

    /// Number of attached receivers that are still alive
    pub fn attached_count(&self) -> usize {
        self.receivers
            .lock()
            .iter()
            .filter(|r| r.strong_count() > 0)
            .count()
    }

    // ========== Tables ==========

    /// Open (creating if absent) a table
    pub fn open_table(&self, name: &str) -> DbResult<TableId> {
        self.ensure_open()?;
        self.adapter
            .open_table(name)
            .ok_or_else(|| DbError::TableOpen(name.to_string()))
    }

    /// Remove every entry of a table
    pub fn clear(&self, table: TableId) -> DbResult<()> {
        self.ensure_open()?;
        if self.adapter.clear_table(table) {
            Ok(())
        } else {
            Err(DbError::Adapter("clear_table"))
        }
    }

    /// Entry count of a table, straight from the adapter
    pub fn size(&self, table: TableId) -> DbResult<u64> {
        self.ensure_open()?;
        Ok(self.adapter.get_table_size(table))
    }

    /// Visit every entry of a table
    pub fn visit(&self, table: TableId, visitor: &mut dyn DbVisitor) -> DbResult<()> {
        self.ensure_open()?;
        if self.adapter.visit_table(table, visitor) {
            Ok(())
        } else {
            Err(DbError::Adapter("visit_table"))
        }
    }

    // ========== Typed access ==========

    /// Remove a key. Removing a missing key succeeds.
    pub fn erase<K: TableKey>(&self, table: TableId, key: &K) -> DbResult<()> {
        self.ensure_open()?;
        if self.adapter.erase(table, &key.to_key_bytes()) {
            Ok(())
        } else {
            Err(DbError::Adapter("erase"))
        }
    }

    /// Read a value through codec `C`
    pub fn get_with<C, K, V>(&self, table: TableId, key: &K) -> DbResult<Option<V>>
    where
        C: ValueCodec<V>,
        K: TableKey,
    {
        self.ensure_open()?;
        match self.adapter.get(table, &key.to_key_bytes()) {
            Some(bytes) => <C as ValueCodec<V>>::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write a value through codec `C`
    pub fn set_with<C, K, V>(&self, table: TableId, key: &K, value: &V) -> DbResult<()>
    where
        C: ValueCodec<V>,
        K: TableKey,
    {
        self.ensure_open()?;
        let bytes = <C as ValueCodec<V>>::encode(value)?;
        if self.adapter.set(table, &key.to_key_bytes(), &bytes) {
            Ok(())
        } else {
            Err(DbError::Adapter("set"))
        }
    }

    /// Read a fixed-layout record
    pub fn get_fixed_layout<K: TableKey, V: FixedLayout>(&self, table: TableId, key: &K) -> DbResult<Option<V>> {
        self.get_with::<FixedLayoutCodec, K, V>(table, key)
    }

    /// Write a fixed-layout record
    pub fn set_fixed_layout<K: TableKey, V: FixedLayout>(&self, table: TableId, key: &K, value: &V) -> DbResult<()> {
        self.set_with::<FixedLayoutCodec, K, V>(table, key, value)
    }

    /// Read a serde object
    pub fn get_self_describing<K: TableKey, V: DeserializeOwned + Serialize>(
        &self,
        table: TableId,
        key: &K,
    ) -> DbResult<Option<V>> {
        self.get_with::<SelfDescribingCodec, K, V>(table, key)
    }

    /// Write a serde object
    pub fn set_self_describing<K: TableKey, V: DeserializeOwned + Serialize>(
        &self,
        table: TableId,
        key: &K,
        value: &V,
    ) -> DbResult<()> {
        self.set_with::<SelfDescribingCodec, K, V>(table, key, value)
    }
}

impl Drop for DbBridge {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}
