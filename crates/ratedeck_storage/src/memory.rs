//! In-memory storage engine.

use crate::engine::{RecordFilter, ScanRequest, StorageEngine};
use crate::error::{StorageError, StorageResult};
use crate::key::{compare_values, field_value, Key};
use crate::schema::{PrimaryKey, SchemaMap, StoreSchema};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct StoreState {
    schema: StoreSchema,
    rows: BTreeMap<Key, Value>,
    next_auto: i64,
}

impl StoreState {
    fn new(schema: StoreSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            next_auto: 1,
        }
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    version: u32,
    open: bool,
    stores: BTreeMap<String, StoreState>,
}

impl DatabaseState {
    fn upgrade(&mut self, db: &str, version: u32, stores: &SchemaMap) {
        self.stores.retain(|name, _| stores.contains_key(name));

        for (name, schema) in stores {
            match self.stores.get_mut(name) {
                Some(existing) if existing.schema.primary_key == schema.primary_key => {
                    existing.schema = schema.clone();
                }
                Some(existing) => {
                    tracing::warn!(db, store = %name, "primary key changed, recreating store");
                    *existing = StoreState::new(schema.clone());
                }
                None => {
                    self.stores
                        .insert(name.clone(), StoreState::new(schema.clone()));
                }
            }
        }
        self.version = version;
    }
}

/// An in-memory storage engine.
///
/// This engine keeps every database in memory and is suitable for:
/// - Unit and integration tests
/// - Ephemeral sessions that don't need persistence across restarts
///
/// Data outlives `close`, so reopen behavior matches a persistent engine
/// within one process.
///
/// # Example
///
/// ```rust
/// use ratedeck_storage::{InMemoryEngine, StorageEngine};
///
/// let engine = InMemoryEngine::new();
/// assert!(!engine.is_open("rates"));
/// assert_eq!(engine.version("rates"), None);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    databases: RwLock<HashMap<String, DatabaseState>>,
    opens: AtomicU64,
    closes: AtomicU64,
}

impl InMemoryEngine {
    /// Creates a new empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Number of `close` calls that closed an open handle.
    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    /// Names of all databases held by the engine.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.databases.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn with_store<R>(
        &self,
        db: &str,
        store: &str,
        f: impl FnOnce(&StoreState) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let databases = self.databases.read();
        let state = databases
            .get(db)
            .filter(|s| s.open)
            .ok_or_else(|| StorageError::NotOpen { db: db.to_string() })?;
        let store_state = state
            .stores
            .get(store)
            .ok_or_else(|| StorageError::StoreNotFound {
                db: db.to_string(),
                store: store.to_string(),
            })?;
        f(store_state)
    }

    fn with_store_mut<R>(
        &self,
        db: &str,
        store: &str,
        f: impl FnOnce(&mut StoreState) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut databases = self.databases.write();
        let state = databases
            .get_mut(db)
            .filter(|s| s.open)
            .ok_or_else(|| StorageError::NotOpen { db: db.to_string() })?;
        let store_state = state
            .stores
            .get_mut(store)
            .ok_or_else(|| StorageError::StoreNotFound {
                db: db.to_string(),
                store: store.to_string(),
            })?;
        f(store_state)
    }
}

fn matches(filter: Option<&RecordFilter>, record: &Value) -> bool {
    filter.map_or(true, |f| f(record))
}

#[async_trait]
impl StorageEngine for InMemoryEngine {
    async fn open(&self, db: &str, version: u32, stores: &SchemaMap) -> StorageResult<()> {
        if version == 0 {
            return Err(StorageError::InvalidSchema(format!(
                "database '{db}' must be opened at version 1 or higher"
            )));
        }

        let mut databases = self.databases.write();
        let state = databases.entry(db.to_string()).or_default();

        if version < state.version {
            return Err(StorageError::VersionConflict {
                db: db.to_string(),
                requested: version,
                current: state.version,
            });
        }
        if version > state.version {
            state.upgrade(db, version, stores);
        }
        state.open = true;
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self, db: &str) {
        if let Some(state) = self.databases.write().get_mut(db) {
            if state.open {
                state.open = false;
                self.closes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn is_open(&self, db: &str) -> bool {
        self.databases.read().get(db).is_some_and(|s| s.open)
    }

    fn version(&self, db: &str) -> Option<u32> {
        self.databases.read().get(db).map(|s| s.version)
    }

    fn introspect(&self, db: &str) -> SchemaMap {
        self.databases
            .read()
            .get(db)
            .filter(|s| s.open)
            .map(|s| {
                s.stores
                    .iter()
                    .map(|(name, store)| (name.clone(), store.schema.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn delete_database(&self, db: &str) -> StorageResult<()> {
        if let Some(state) = self.databases.write().remove(db) {
            if state.open {
                self.closes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    async fn put_batch(
        &self,
        db: &str,
        store: &str,
        records: Vec<Value>,
    ) -> StorageResult<Vec<Key>> {
        self.with_store_mut(db, store, |s| {
            let mut next_auto = s.next_auto;
            let mut staged = Vec::with_capacity(records.len());

            for mut record in records {
                let key = match &s.schema.primary_key {
                    PrimaryKey::Field(field) => field_value(&record, field)
                        .and_then(Key::from_value)
                        .ok_or_else(|| StorageError::InvalidKey {
                            store: store.to_string(),
                            message: format!("missing or non-key value in '{field}'"),
                        })?,
                    PrimaryKey::AutoIncrement { field } => {
                        let existing = field
                            .as_deref()
                            .and_then(|f| field_value(&record, f))
                            .and_then(Key::from_value);
                        match existing {
                            Some(key) => {
                                if let Key::Int(i) = key {
                                    next_auto = next_auto.max(i.saturating_add(1));
                                }
                                key
                            }
                            None => {
                                let id = next_auto;
                                next_auto += 1;
                                if let Some(field) = field {
                                    let obj = record.as_object_mut().ok_or_else(|| {
                                        StorageError::InvalidKey {
                                            store: store.to_string(),
                                            message: "record is not an object".into(),
                                        }
                                    })?;
                                    obj.insert(field.clone(), Value::from(id));
                                }
                                Key::Int(id)
                            }
                        }
                    }
                };
                staged.push((key, record));
            }

            s.next_auto = next_auto;
            let mut keys = Vec::with_capacity(staged.len());
            for (key, record) in staged {
                s.rows.insert(key.clone(), record);
                keys.push(key);
            }
            Ok(keys)
        })
    }

    async fn get(&self, db: &str, store: &str, key: &Key) -> StorageResult<Option<Value>> {
        self.with_store(db, store, |s| Ok(s.rows.get(key).cloned()))
    }

    async fn delete(&self, db: &str, store: &str, key: &Key) -> StorageResult<bool> {
        self.with_store_mut(db, store, |s| Ok(s.rows.remove(key).is_some()))
    }

    async fn clear(&self, db: &str, store: &str) -> StorageResult<()> {
        self.with_store_mut(db, store, |s| {
            s.rows.clear();
            Ok(())
        })
    }

    async fn count(
        &self,
        db: &str,
        store: &str,
        filter: Option<RecordFilter>,
    ) -> StorageResult<usize> {
        self.with_store(db, store, |s| {
            Ok(s.rows
                .values()
                .filter(|r| matches(filter.as_ref(), r))
                .count())
        })
    }

    async fn scan(&self, db: &str, store: &str, request: ScanRequest) -> StorageResult<Vec<Value>> {
        self.with_store(db, store, |s| {
            let mut rows: Vec<&Value> = s.rows.values().collect();

            if let Some(field) = &request.order_by {
                if !s.schema.has_index(field) {
                    return Err(StorageError::IndexNotFound {
                        store: store.to_string(),
                        index: field.clone(),
                    });
                }
                rows.sort_by(|a, b| {
                    compare_values(
                        field_value(a, field).unwrap_or(&Value::Null),
                        field_value(b, field).unwrap_or(&Value::Null),
                    )
                });
            }
            if request.reverse {
                rows.reverse();
            }

            Ok(rows
                .into_iter()
                .filter(|r| matches(request.filter.as_ref(), r))
                .skip(request.offset)
                .take(request.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect())
        })
    }
}
