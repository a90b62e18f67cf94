//! Storage adapter contract
//!
//! Every embedded engine plugs into the broker through [`DbAdapter`]. The
//! contract works on opaque byte buffers and reports failure through plain
//! `bool`/`Option` returns; engines log their own errors and the broker maps
//! declined operations onto [`DbError`](crate::DbError).

/// Opaque handle of an opened table, stable for the adapter's lifetime
pub type TableId = u64;

/// `read_only` value for a read-write transaction
pub const TX_READ_WRITE: bool = false;

/// `read_only` value for a read-only transaction
pub const TX_READ_ONLY: bool = true;

/// Callback driven once per stored entry by [`DbAdapter::visit_table`]
pub trait DbVisitor {
    /// Visit the `index`-th entry. Return `false` to stop the visit.
    fn on_visit_db_item(&mut self, index: usize, key: &[u8], value: &[u8]) -> bool;
}

impl<F> DbVisitor for F
where
    F: FnMut(usize, &[u8], &[u8]) -> bool,
{
    fn on_visit_db_item(&mut self, index: usize, key: &[u8], value: &[u8]) -> bool {
        self(index, key, value)
    }
}

/// Interface for a database engine
pub trait DbAdapter: Send + Sync {
    /// Open the database. `name` is engine-defined (a path for on-disk engines).
    fn open(&self, name: &str) -> bool;

    /// Close the database. Closing a closed database returns `false`.
    fn close(&self) -> bool;

    /// Open (creating if absent) a named table.
    ///
    /// Opening the same name twice yields the same id.
    fn open_table(&self, name: &str) -> Option<TableId>;

    /// Remove every entry of a table
    fn clear_table(&self, table: TableId) -> bool;

    /// Number of entries in a table
    fn get_table_size(&self, table: TableId) -> u64;

    /// Begin the single active transaction. A second begin before
    /// commit/abort is declined.
    fn begin_transaction(&self, read_only: bool) -> bool;

    /// Commit the active transaction
    fn commit_transaction(&self) -> bool;

    /// Discard the active transaction
    fn abort_transaction(&self);

    /// Read a value
    fn get(&self, table: TableId, key: &[u8]) -> Option<Vec<u8>>;

    /// Insert or overwrite a value
    fn set(&self, table: TableId, key: &[u8], value: &[u8]) -> bool;

    /// Remove a value. Removing a missing key is not a failure.
    fn erase(&self, table: TableId, key: &[u8]) -> bool;

    /// Visit every entry of a table in a stable order until the visitor
    /// returns `false`.
    fn visit_table(&self, table: TableId, visitor: &mut dyn DbVisitor) -> bool;
}
