//! Storage engine trait definition.

use crate::error::StorageResult;
use crate::key::Key;
use crate::schema::SchemaMap;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate applied to records during a scan or count.
pub type RecordFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Parameters of a store scan.
///
/// The filter is applied after ordering and before offset/limit, so an
/// offset always refers to a position within the filtered sequence.
#[derive(Clone, Default)]
pub struct ScanRequest {
    /// Index field to order by; `None` means primary key order.
    pub order_by: Option<String>,
    /// Reverse the order.
    pub reverse: bool,
    /// Records must satisfy this predicate.
    pub filter: Option<RecordFilter>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl ScanRequest {
    /// A scan of the whole store in primary key order.
    pub fn all() -> Self {
        Self::default()
    }

    /// Orders the scan by an index field.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    /// Reverses the scan order.
    #[must_use]
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Restricts the scan to records matching `filter`.
    #[must_use]
    pub fn filter(mut self, filter: Option<RecordFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Skips the first `offset` matching records.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Returns at most `limit` records.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Debug for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRequest")
            .field("order_by", &self.order_by)
            .field("reverse", &self.reverse)
            .field("filtered", &self.filter.is_some())
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

/// A versioned, keyed object-store engine.
///
/// Engines hold named databases. Each database has a schema version and a
/// set of stores. The engine does not keep schema history: callers hand it
/// the complete store map of the version they open.
///
/// # Invariants
///
/// - `open` at the stored version leaves the schema untouched
/// - `open` at a higher version creates stores missing from the current
///   schema and deletes stores absent from `stores`
/// - `open` at a lower version fails permanently
/// - Data survives `close`; only `delete_database` removes it
/// - A failed `put_batch` writes nothing from that batch
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Opens `db` at `version`, upgrading to `stores` if the version is new.
    async fn open(&self, db: &str, version: u32, stores: &SchemaMap) -> StorageResult<()>;

    /// Closes the handle for `db`. Closing a closed database is a no-op.
    fn close(&self, db: &str);

    /// Returns true if `db` currently has an open handle.
    fn is_open(&self, db: &str) -> bool;

    /// Returns the stored schema version of `db`, if it exists.
    fn version(&self, db: &str) -> Option<u32>;

    /// Returns the store definitions visible on the open handle.
    ///
    /// A closed or unknown database yields an empty map.
    fn introspect(&self, db: &str) -> SchemaMap;

    /// Closes and removes `db` with all of its stores.
    async fn delete_database(&self, db: &str) -> StorageResult<()>;

    /// Inserts or replaces records, returning their primary keys.
    async fn put_batch(&self, db: &str, store: &str, records: Vec<Value>)
        -> StorageResult<Vec<Key>>;

    /// Fetches a record by primary key.
    async fn get(&self, db: &str, store: &str, key: &Key) -> StorageResult<Option<Value>>;

    /// Deletes a record by primary key, returning whether it existed.
    async fn delete(&self, db: &str, store: &str, key: &Key) -> StorageResult<bool>;

    /// Removes every record from a store.
    async fn clear(&self, db: &str, store: &str) -> StorageResult<()>;

    /// Counts records, optionally only those matching `filter`.
    async fn count(&self, db: &str, store: &str, filter: Option<RecordFilter>)
        -> StorageResult<usize>;

    /// Reads records according to `request`.
    async fn scan(&self, db: &str, store: &str, request: ScanRequest) -> StorageResult<Vec<Value>>;
}
