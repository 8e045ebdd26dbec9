//! Fault injection around a real engine.
//!
//! [`FaultyEngine`] forwards every call to an inner engine, except the ones
//! a test has armed to fail. Faults are consumed as they fire.

use async_trait::async_trait;
use parking_lot::Mutex;
use ratedeck_storage::{
    ErrorKind, InMemoryEngine, Key, RecordFilter, ScanRequest, SchemaMap, StorageEngine,
    StorageError, StorageResult,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// How an armed open fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFault {
    /// A typed error of the given kind.
    Typed(ErrorKind),
    /// An untyped message, classified by [`StorageError::from_message`].
    Message(String),
}

#[derive(Debug, Default)]
struct FaultPlan {
    opens: VecDeque<OpenFault>,
    put_batch_at: Option<(usize, ErrorKind)>,
    scans: usize,
}

/// Engine wrapper that fails selected calls.
#[derive(Debug)]
pub struct FaultyEngine<E = InMemoryEngine> {
    inner: E,
    plan: Mutex<FaultPlan>,
    open_attempts: AtomicU32,
    put_batches: AtomicUsize,
}

impl<E: StorageEngine> FaultyEngine<E> {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            plan: Mutex::new(FaultPlan::default()),
            open_attempts: AtomicU32::new(0),
            put_batches: AtomicUsize::new(0),
        }
    }

    /// The wrapped engine.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Fails the next `count` opens with a typed error of `kind`.
    pub fn fail_opens(&self, count: usize, kind: ErrorKind) {
        let mut plan = self.plan.lock();
        plan.opens.extend(std::iter::repeat(OpenFault::Typed(kind)).take(count));
    }

    /// Fails the next open with an untyped `message`.
    pub fn fail_open_with_message(&self, message: impl Into<String>) {
        self.plan.lock().opens.push_back(OpenFault::Message(message.into()));
    }

    /// Fails the `index`-th `put_batch` call (0-based, counted from now).
    pub fn fail_put_batch_at(&self, index: usize, kind: ErrorKind) {
        let armed_at = self.put_batches.load(Ordering::SeqCst);
        self.plan.lock().put_batch_at = Some((armed_at + index, kind));
    }

    /// Fails the next `count` scans.
    pub fn fail_scans(&self, count: usize) {
        self.plan.lock().scans = count;
    }

    /// Opens attempted so far, failed or not.
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// `put_batch` calls so far, failed or not.
    pub fn put_batch_calls(&self) -> usize {
        self.put_batches.load(Ordering::SeqCst)
    }

    /// Disarms every pending fault.
    pub fn heal(&self) {
        *self.plan.lock() = FaultPlan::default();
    }
}

#[async_trait]
impl<E: StorageEngine> StorageEngine for FaultyEngine<E> {
    async fn open(&self, db: &str, version: u32, stores: &SchemaMap) -> StorageResult<()> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        let fault = self.plan.lock().opens.pop_front();
        match fault {
            Some(OpenFault::Typed(ErrorKind::Transient)) => {
                Err(StorageError::transient(db, "injected timeout"))
            }
            Some(OpenFault::Typed(ErrorKind::Permanent)) => {
                Err(StorageError::permanent(db, "injected quota exceeded"))
            }
            Some(OpenFault::Message(message)) => Err(StorageError::from_message(message)),
            None => self.inner.open(db, version, stores).await,
        }
    }

    fn close(&self, db: &str) {
        self.inner.close(db);
    }

    fn is_open(&self, db: &str) -> bool {
        self.inner.is_open(db)
    }

    fn version(&self, db: &str) -> Option<u32> {
        self.inner.version(db)
    }

    fn introspect(&self, db: &str) -> SchemaMap {
        self.inner.introspect(db)
    }

    async fn delete_database(&self, db: &str) -> StorageResult<()> {
        self.inner.delete_database(db).await
    }

    async fn put_batch(&self, db: &str, store: &str, records: Vec<Value>) -> StorageResult<Vec<Key>> {
        let call = self.put_batches.fetch_add(1, Ordering::SeqCst);
        let fault = {
            let mut plan = self.plan.lock();
            match plan.put_batch_at {
                Some((at, kind)) if at == call => {
                    plan.put_batch_at = None;
                    Some(kind)
                }
                _ => None,
            }
        };
        match fault {
            Some(kind) => Err(StorageError::Backend {
                message: format!("injected failure on batch call {call}"),
                kind,
            }),
            None => self.inner.put_batch(db, store, records).await,
        }
    }

    async fn get(&self, db: &str, store: &str, key: &Key) -> StorageResult<Option<Value>> {
        self.inner.get(db, store, key).await
    }

    async fn delete(&self, db: &str, store: &str, key: &Key) -> StorageResult<bool> {
        self.inner.delete(db, store, key).await
    }

    async fn clear(&self, db: &str, store: &str) -> StorageResult<()> {
        self.inner.clear(db, store).await
    }

    async fn count(&self, db: &str, store: &str, filter: Option<RecordFilter>) -> StorageResult<usize> {
        self.inner.count(db, store, filter).await
    }

    async fn scan(&self, db: &str, store: &str, request: ScanRequest) -> StorageResult<Vec<Value>> {
        let fail = {
            let mut plan = self.plan.lock();
            if plan.scans > 0 {
                plan.scans -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(StorageError::Backend {
                message: "injected scan failure".to_string(),
                kind: ErrorKind::Permanent,
            });
        }
        self.inner.scan(db, store, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_faults_are_consumed_in_order() {
        let engine = FaultyEngine::new(InMemoryEngine::new());
        engine.fail_opens(1, ErrorKind::Transient);
        engine.fail_open_with_message("Quota exceeded");

        let first = engine.open("rates", 1, &SchemaMap::new()).await.unwrap_err();
        assert!(first.is_transient());
        let second = engine.open("rates", 1, &SchemaMap::new()).await.unwrap_err();
        assert!(!second.is_transient());
        engine.open("rates", 1, &SchemaMap::new()).await.unwrap();

        assert_eq!(engine.open_attempts(), 3);
        assert!(engine.is_open("rates"));
    }

    #[tokio::test]
    async fn put_batch_fault_fires_once() {
        let engine = FaultyEngine::new(InMemoryEngine::new());
        let mut stores = SchemaMap::new();
        stores.insert("items".into(), "++id".parse().unwrap());
        engine.open("rates", 1, &stores).await.unwrap();
        engine.fail_put_batch_at(1, ErrorKind::Permanent);

        let row = || vec![serde_json::json!({"n": 1})];
        engine.put_batch("rates", "items", row()).await.unwrap();
        assert!(engine.put_batch("rates", "items", row()).await.is_err());
        engine.put_batch("rates", "items", row()).await.unwrap();
        assert_eq!(engine.count("rates", "items", None).await.unwrap(), 2);
    }
}
