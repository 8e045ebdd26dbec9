//! Connection lifecycle: one reference-counted handle per database name.
//!
//! `acquire` opens the database on first use and bumps the reference count;
//! `release` drops it and closes the handle once nobody holds it. Opens are
//! retried with linear backoff, but only for errors the engine marks as
//! transient.
//!
//! Two latches guard every database:
//!
//! - the *open latch* makes concurrent `acquire` calls share one open
//! - the *migration latch* is held shared by `acquire` and exclusively by
//!   schema migrations, so no borrower can slip in between a migration's
//!   close and reopen

use crate::error::{CoreError, CoreResult};
use crate::registry::SchemaRegistry;
use parking_lot::Mutex;
use ratedeck_storage::{
    Key, RecordFilter, ScanRequest, SchemaMap, StorageEngine, StorageError, StorageResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No open handle.
    Closed,
    /// An open is in flight.
    Opening,
    /// The handle is open.
    Open,
    /// The handle is being closed.
    Closing,
}

/// Retry behavior for transient open failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub budget: u32,
    /// Delay unit; retry `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub const fn new(budget: u32, base_delay: Duration) -> Self {
        Self { budget, base_delay }
    }

    /// A policy that never retries.
    pub const fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// Diagnostic view of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Number of outstanding borrowers.
    pub ref_count: usize,
    /// Message of the last failed open, cleared by a successful one.
    pub last_error: Option<String>,
    /// Whether an open is in flight.
    pub is_connecting: bool,
    /// Whether a schema migration is running.
    pub migrating: bool,
}

#[derive(Debug)]
struct SlotState {
    state: ConnectionState,
    ref_count: usize,
    last_error: Option<String>,
    migrating: bool,
    // Bumped whenever outstanding references are discarded wholesale.
    epoch: u64,
}

/// Per-database bookkeeping shared by every handle to that database.
#[derive(Debug)]
pub(crate) struct ConnectionSlot {
    name: String,
    state: Mutex<SlotState>,
    is_connecting: AtomicBool,
    open_latch: tokio::sync::Mutex<()>,
    migration_latch: tokio::sync::RwLock<()>,
}

impl ConnectionSlot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SlotState {
                state: ConnectionState::Closed,
                ref_count: 0,
                last_error: None,
                migrating: false,
                epoch: 0,
            }),
            is_connecting: AtomicBool::new(false),
            open_latch: tokio::sync::Mutex::new(()),
            migration_latch: tokio::sync::RwLock::new(()),
        }
    }

    fn status(&self) -> ConnectionStatus {
        let state = self.state.lock();
        ConnectionStatus {
            state: state.state,
            ref_count: state.ref_count,
            last_error: state.last_error.clone(),
            is_connecting: self.is_connecting.load(Ordering::SeqCst),
            migrating: state.migrating,
        }
    }

    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    fn release(&self, engine: &dyn StorageEngine, epoch: u64) {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            tracing::trace!(db = %self.name, epoch, current = state.epoch, "stale release ignored");
            return;
        }
        if state.ref_count == 0 {
            return;
        }
        state.ref_count -= 1;
        if state.ref_count == 0 && !state.migrating && engine.is_open(&self.name) {
            state.state = ConnectionState::Closing;
            engine.close(&self.name);
            state.state = ConnectionState::Closed;
            tracing::debug!(db = %self.name, "idle connection closed");
        }
    }

    pub(crate) fn migration_latch(&self) -> &tokio::sync::RwLock<()> {
        &self.migration_latch
    }

    pub(crate) fn set_migrating(&self, migrating: bool) {
        self.state.lock().migrating = migrating;
    }

    /// Drops every outstanding reference; their later releases become no-ops.
    pub(crate) fn invalidate_references(&self) {
        let mut state = self.state.lock();
        state.ref_count = 0;
        state.epoch += 1;
    }
}

/// Registry of connections, one per database name.
///
/// Construct one per process and share it through an `Arc`; every other
/// component receives it explicitly.
pub struct ConnectionManager {
    engine: Arc<dyn StorageEngine>,
    registry: Arc<SchemaRegistry>,
    retry: RetryPolicy,
    slots: Mutex<HashMap<String, Arc<ConnectionSlot>>>,
}

impl ConnectionManager {
    /// Creates a manager over `engine`.
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        registry: Arc<SchemaRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            registry,
            retry,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// The schema registry used for opens.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// The retry policy for opens.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub(crate) fn slot(&self, db: &str) -> Arc<ConnectionSlot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(db.to_string())
                .or_insert_with(|| Arc::new(ConnectionSlot::new(db))),
        )
    }

    /// Returns the shared connection for `db`, opening it if needed.
    ///
    /// Every successful call must be paired with [`ConnectionManager::release`]
    /// (or use [`ConnectionManager::lease`]).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] once a permanent error occurs or
    /// the retry budget is spent.
    pub async fn acquire(&self, db: &str) -> CoreResult<Connection> {
        let slot = self.slot(db);
        let epoch;
        {
            let _shared = slot.migration_latch.read().await;
            loop {
                self.ensure_open(&slot).await?;

                let mut state = slot.state.lock();
                // A release may have closed the handle since ensure_open returned.
                if self.engine.is_open(db) {
                    state.ref_count += 1;
                    state.state = ConnectionState::Open;
                    epoch = state.epoch;
                    tracing::trace!(db, ref_count = state.ref_count, "connection acquired");
                    break;
                }
            }
        }

        Ok(Connection {
            slot,
            engine: Arc::clone(&self.engine),
            epoch,
        })
    }

    /// Like [`ConnectionManager::acquire`], but releases on drop.
    pub async fn lease(&self, db: &str) -> CoreResult<Lease> {
        Ok(Lease {
            connection: self.acquire(db).await?,
        })
    }

    /// Drops one reference to `db`, closing it when none remain.
    ///
    /// Does nothing if the reference count is already zero.
    pub fn release(&self, db: &str) {
        let slot = self.slots.lock().get(db).cloned();
        if let Some(slot) = slot {
            slot.release(self.engine.as_ref(), slot.epoch());
        }
    }

    /// Diagnostic status of `db`.
    pub fn status(&self, db: &str) -> ConnectionStatus {
        let slot = self.slots.lock().get(db).cloned();
        match slot {
            Some(slot) => slot.status(),
            None => ConnectionStatus {
                state: ConnectionState::Closed,
                ref_count: 0,
                last_error: None,
                is_connecting: false,
                migrating: false,
            },
        }
    }

    /// Current reference count of `db`.
    pub fn ref_count(&self, db: &str) -> usize {
        self.status(db).ref_count
    }

    /// Closes every handle and resets all reference counts.
    ///
    /// Connections and leases handed out before the shutdown are orphaned:
    /// releasing them later leaves newer borrowers untouched.
    pub fn shutdown(&self) {
        let slots: Vec<_> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            slot.invalidate_references();
            let mut state = slot.state.lock();
            self.engine.close(&slot.name);
            state.state = ConnectionState::Closed;
        }
        tracing::info!("connection manager shut down");
    }

    /// Closes `db` ahead of a schema change, regardless of borrowers.
    pub(crate) fn close_for_migration(&self, slot: &ConnectionSlot) {
        let mut state = slot.state.lock();
        if self.engine.is_open(&slot.name) {
            state.state = ConnectionState::Closing;
            self.engine.close(&slot.name);
        }
        state.state = ConnectionState::Closed;
    }

    /// Closes `db` if nobody holds a reference to it.
    pub(crate) fn close_if_idle(&self, slot: &ConnectionSlot) {
        let mut state = slot.state.lock();
        if state.ref_count == 0 && !state.migrating && self.engine.is_open(&slot.name) {
            state.state = ConnectionState::Closing;
            self.engine.close(&slot.name);
            state.state = ConnectionState::Closed;
            tracing::debug!(db = %slot.name, "idle connection closed after migration");
        }
    }

    /// Opens `db` if needed without touching reference counts.
    ///
    /// Callers holding the migration latch use this instead of `acquire`.
    pub(crate) async fn ensure_open(&self, slot: &ConnectionSlot) -> CoreResult<()> {
        if self.engine.is_open(&slot.name) {
            return Ok(());
        }

        let _open = slot.open_latch.lock().await;
        if self.engine.is_open(&slot.name) {
            // Another borrower finished the open while we waited.
            return Ok(());
        }

        slot.is_connecting.store(true, Ordering::SeqCst);
        slot.state.lock().state = ConnectionState::Opening;

        let result = self.open_with_retry(&slot.name).await;

        slot.is_connecting.store(false, Ordering::SeqCst);
        let mut state = slot.state.lock();
        match &result {
            Ok(()) => {
                state.state = ConnectionState::Open;
                state.last_error = None;
            }
            Err(err) => {
                state.state = ConnectionState::Closed;
                state.last_error = Some(err.to_string());
            }
        }
        result
    }

    async fn open_with_retry(&self, db: &str) -> CoreResult<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.open_once(db).await {
                Ok(()) => {
                    tracing::debug!(db, attempt, "database opened");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt <= self.retry.budget => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(db, attempt, ?delay, error = %err, "transient open failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(source) => {
                    tracing::error!(db, attempt, error = %source, "database open failed");
                    return Err(CoreError::Connection {
                        db: db.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    async fn open_once(&self, db: &str) -> StorageResult<()> {
        if let Some(version) = self.registry.current_version(db) {
            let schema = self.registry.derived_schema(db);
            return match self.engine.open(db, version, &schema).await {
                Err(StorageError::VersionConflict { current, .. }) => {
                    tracing::warn!(db, ours = version, theirs = current, "stored schema is newer, adopting it");
                    self.adopt_existing(db, current).await
                }
                other => other,
            };
        }

        match self.engine.version(db) {
            Some(version) if version > 0 => self.adopt_existing(db, version).await,
            _ => {
                self.engine.open(db, 1, &SchemaMap::new()).await?;
                self.registry.seed(db, 1, SchemaMap::new());
                tracing::info!(db, "database created");
                Ok(())
            }
        }
    }

    async fn adopt_existing(&self, db: &str, version: u32) -> StorageResult<()> {
        self.engine.open(db, version, &SchemaMap::new()).await?;
        self.registry.seed(db, version, self.engine.introspect(db));
        Ok(())
    }
}

/// A borrowed handle to an open database.
///
/// Cloning a `Connection` does not add a reference; only `acquire` does.
#[derive(Clone)]
pub struct Connection {
    slot: Arc<ConnectionSlot>,
    engine: Arc<dyn StorageEngine>,
    epoch: u64,
}

impl Connection {
    /// Database name.
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Diagnostic status of the shared connection.
    pub fn status(&self) -> ConnectionStatus {
        self.slot.status()
    }

    /// Whether the underlying handle is open right now.
    pub fn is_open(&self) -> bool {
        self.engine.is_open(&self.slot.name)
    }

    /// Store metadata of the live handle.
    pub fn introspect(&self) -> SchemaMap {
        self.engine.introspect(&self.slot.name)
    }

    /// Inserts or replaces records.
    pub async fn put_batch(&self, store: &str, records: Vec<Value>) -> StorageResult<Vec<Key>> {
        self.engine.put_batch(&self.slot.name, store, records).await
    }

    /// Fetches a record by primary key.
    pub async fn get(&self, store: &str, key: &Key) -> StorageResult<Option<Value>> {
        self.engine.get(&self.slot.name, store, key).await
    }

    /// Deletes a record by primary key.
    pub async fn delete(&self, store: &str, key: &Key) -> StorageResult<bool> {
        self.engine.delete(&self.slot.name, store, key).await
    }

    /// Empties a store.
    pub async fn clear(&self, store: &str) -> StorageResult<()> {
        self.engine.clear(&self.slot.name, store).await
    }

    /// Counts records matching `filter`.
    pub async fn count(&self, store: &str, filter: Option<RecordFilter>) -> StorageResult<usize> {
        self.engine.count(&self.slot.name, store, filter).await
    }

    /// Reads records.
    pub async fn scan(&self, store: &str, request: ScanRequest) -> StorageResult<Vec<Value>> {
        self.engine.scan(&self.slot.name, store, request).await
    }

    /// Gives back the reference taken by `acquire`.
    pub fn release(self) {
        self.slot.release(self.engine.as_ref(), self.epoch);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.slot.name)
            .field("status", &self.slot.status())
            .finish()
    }
}

/// A connection reference that is released when dropped.
#[derive(Debug)]
pub struct Lease {
    connection: Connection,
}

impl Deref for Lease {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.connection
            .slot
            .release(self.connection.engine.as_ref(), self.connection.epoch);
    }
}
