//! Typed table accessors
//!
//! A [`KeyValueAccessor`] is a typed `K -> V` view over one table. It keeps
//! a size cache that is only trusted by the thread holding the open write
//! transaction, and only until the next mutation or the end of that
//! transaction.

use crate::adapter::TableId;
use crate::bridge::{DbBridge, WriteTxNotificationReceiver};
use crate::codec::{FixedLayoutCodec, SelfDescribingCodec, ValueCodec};
use crate::error::{DbError, DbResult};
use crate::exclusive::ExclusiveAccess;
use crate::key::TableKey;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// Accessor over fixed-layout records
pub type FixedLayoutAccessor<K, V> = KeyValueAccessor<K, V, FixedLayoutCodec>;

/// Accessor over serde objects
pub type SerializableAccessor<K, V> = KeyValueAccessor<K, V, SelfDescribingCodec>;

#[derive(Debug, Default)]
struct SizeCache {
    size: u64,
    valid: bool,
}

/// Transaction-outcome state of one accessor, attached to the broker
#[derive(Debug, Default)]
struct TableReceiver {
    exclusive: ExclusiveAccess,
    cache: Mutex<SizeCache>,
}

impl TableReceiver {
    fn invalidate(&self) {
        self.cache.lock().valid = false;
    }

    fn cached_size(&self) -> Option<u64> {
        let cache = self.cache.lock();
        cache.valid.then_some(cache.size)
    }

    fn store_size(&self, size: u64) {
        let mut cache = self.cache.lock();
        cache.size = size;
        cache.valid = true;
    }
}

impl WriteTxNotificationReceiver for TableReceiver {
    fn on_write_transaction_begin(&self) {
        self.invalidate();
        self.exclusive.set_exclusive_mode_for_this_thread();
    }

    fn on_write_transaction_commit(&self) {
        self.exclusive.clear_exclusive_mode();
        self.invalidate();
    }

    fn on_write_transaction_abort(&self) {
        self.exclusive.clear_exclusive_mode();
        self.invalidate();
    }
}

/// Typed view over one table
///
/// `C` selects how values are stored: [`FixedLayoutCodec`] or
/// [`SelfDescribingCodec`]. The accessor attaches to the broker on
/// construction and detaches when dropped.
pub struct KeyValueAccessor<K, V, C> {
    bridge: Arc<DbBridge>,
    table: Option<TableId>,
    receiver: Arc<TableReceiver>,
    _marker: PhantomData<fn() -> (K, V, C)>,
}

impl<K, V, C> KeyValueAccessor<K, V, C>
where
    K: TableKey,
    C: ValueCodec<V>,
{
    /// Create an unbound accessor attached to `bridge`
    pub fn new(bridge: &Arc<DbBridge>) -> DbResult<Self> {
        let receiver = Arc::new(TableReceiver::default());
        let handle: Arc<dyn WriteTxNotificationReceiver> = receiver.clone();
        bridge.attach(&handle)?;
        Ok(Self {
            bridge: Arc::clone(bridge),
            table: None,
            receiver,
            _marker: PhantomData,
        })
    }

    /// Create an accessor and bind it to `table_name`
    pub fn open(bridge: &Arc<DbBridge>, table_name: &str) -> DbResult<Self> {
        let mut accessor = Self::new(bridge)?;
        accessor.bind(table_name)?;
        Ok(accessor)
    }

    /// Open (creating if absent) the backing table.
    ///
    /// # Panics
    ///
    /// Panics if the accessor is already bound.
    pub fn bind(&mut self, table_name: &str) -> DbResult<()> {
        assert!(self.table.is_none(), "accessor already bound to a table");
        self.table = Some(self.bridge.open_table(table_name)?);
        Ok(())
    }

    /// Whether [`bind`](Self::bind) has been called
    pub fn is_bound(&self) -> bool {
        self.table.is_some()
    }

    /// The bound table id
    ///
    /// # Panics
    ///
    /// Panics if the accessor is not bound.
    pub fn table_id(&self) -> TableId {
        match self.table {
            Some(table) => table,
            None => panic!("table accessor used before bind"),
        }
    }

    /// The broker this accessor is attached to
    pub fn bridge(&self) -> &Arc<DbBridge> {
        &self.bridge
    }

    /// Whether a size is currently cached
    pub fn cached_size_is_valid(&self) -> bool {
        self.receiver.cached_size().is_some()
    }

    // ========== Transactions ==========

    /// Begin a transaction on the broker
    pub fn begin_transaction(&self, read_only: bool) -> DbResult<()> {
        self.bridge.begin_transaction(read_only)
    }

    /// Commit the broker's transaction
    pub fn commit_transaction(&self) -> DbResult<()> {
        self.bridge.commit_transaction().inspect_err(|_| {
            self.receiver.invalidate();
        })
    }

    /// Abort the broker's transaction
    pub fn abort_transaction(&self) {
        self.receiver.invalidate();
        self.bridge.abort_transaction();
    }

    // ========== Reads ==========

    /// Read a value. A missing key is `Ok(None)`.
    pub fn get(&self, key: &K) -> DbResult<Option<Arc<V>>> {
        Ok(self
            .bridge
            .get_with::<C, K, V>(self.table_id(), key)?
            .map(Arc::new))
    }

    /// Read a value that must exist
    ///
    /// # Panics
    ///
    /// Panics if the key is absent.
    pub fn index(&self, key: &K) -> DbResult<Arc<V>> {
        match self.get(key)? {
            Some(value) => Ok(value),
            None => panic!("out of range: key not found in table {}", self.table_id()),
        }
    }

    /// Read through an explicit key type and codec
    pub fn explicit_get<K2, V2, C2>(&self, key: &K2) -> DbResult<Option<Arc<V2>>>
    where
        K2: TableKey,
        C2: ValueCodec<V2>,
    {
        Ok(self
            .bridge
            .get_with::<C2, K2, V2>(self.table_id(), key)?
            .map(Arc::new))
    }

    // ========== Writes ==========

    /// Insert or overwrite a value
    pub fn set(&self, key: &K, value: &V) -> DbResult<()> {
        self.receiver.invalidate();
        self.bridge.set_with::<C, K, V>(self.table_id(), key, value)
    }

    /// Write through an explicit key type and codec
    pub fn explicit_set<K2, V2, C2>(&self, key: &K2, value: &V2) -> DbResult<()>
    where
        K2: TableKey,
        C2: ValueCodec<V2>,
    {
        self.receiver.invalidate();
        self.bridge.set_with::<C2, K2, V2>(self.table_id(), key, value)
    }

    /// Remove a key. Removing a missing key succeeds.
    pub fn erase(&self, key: &K) -> DbResult<()> {
        let result = self.bridge.erase(self.table_id(), key);
        self.receiver.invalidate();
        result
    }

    /// Remove a key, reporting whether it existed.
    ///
    /// The existence check is a separate read; outside a transaction another
    /// writer may race it.
    pub fn erase_validate(&self, key: &K) -> DbResult<bool> {
        let existed = self.get(key)?.is_some();
        self.erase(key)?;
        Ok(existed)
    }

    /// Remove every entry
    pub fn clear(&self) -> DbResult<()> {
        let result = self.bridge.clear(self.table_id());
        self.receiver.invalidate();
        result
    }

    // ========== Size ==========

    /// Entry count.
    ///
    /// The thread holding the write transaction is served from the cache
    /// when it is valid and refreshes it otherwise; every other thread asks
    /// the adapter.
    pub fn size(&self) -> DbResult<u64> {
        let table = self.table_id();
        self.receiver.exclusive.run(|exclusive| {
            if exclusive {
                if let Some(size) = self.receiver.cached_size() {
                    return Ok(size);
                }
            }
            let size = self.bridge.size(table)?;
            if exclusive {
                self.receiver.store_size(size);
            }
            Ok(size)
        })
    }

    /// Entry count straight from the adapter, bypassing the cache
    pub fn size_no_cache(&self) -> DbResult<u64> {
        self.bridge.size(self.table_id())
    }

    // ========== Enumeration ==========

    /// Call `callback(index, key)` for every key until it returns `false`
    pub fn enumerate_keys<F>(&self, mut callback: F) -> DbResult<()>
    where
        F: FnMut(usize, &K) -> bool,
    {
        let mut failure = None;
        self.bridge.visit(self.table_id(), &mut |i: usize, k: &[u8], _v: &[u8]| {
            match K::from_key_bytes(k) {
                Ok(key) => callback(i, &key),
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;
        failure.map_or(Ok(()), Err)
    }

    /// Call `callback(index, key, value)` for every entry until it returns
    /// `false`
    pub fn enumerate_items<F>(&self, mut callback: F) -> DbResult<()>
    where
        F: FnMut(usize, &K, &V) -> bool,
    {
        let mut failure: Option<DbError> = None;
        self.bridge.visit(self.table_id(), &mut |i: usize, k: &[u8], v: &[u8]| {
            let decoded = K::from_key_bytes(k).and_then(|key| Ok((key, <C as ValueCodec<V>>::decode(v)?)));
            match decoded {
                Ok((key, value)) => callback(i, &key, &value),
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;
        failure.map_or(Ok(()), Err)
    }
}

impl<K, V, C> Drop for KeyValueAccessor<K, V, C> {
    fn drop(&mut self) {
        let handle: Arc<dyn WriteTxNotificationReceiver> = self.receiver.clone();
        if let Err(e) = self.bridge.detach(&handle) {
            tracing::error!(error = %e, "failed to detach table accessor");
            if !std::thread::panicking() {
                panic!("failed to detach table accessor: {e}");
            }
        }
    }
}
