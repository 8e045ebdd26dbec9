//! Processed-data cache: one memoized whole-table aggregate per database.
//!
//! An entry is served while it is non-empty and younger than the TTL.
//! Anything else, or a forced refresh, recomputes it through
//! [`BulkPipeline::scan_and_reduce`] and replaces it wholesale.
//!
//! Every bulk write invalidates the cache through the [`Invalidate`] hook.
//! A recompute that overlaps an invalidation still returns its result to
//! the caller but does not store it, so the cache never holds data older
//! than the last write.

use crate::error::CoreResult;
use crate::pipeline::{BulkPipeline, Invalidate, Reducer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// An aggregate that can be rebuilt by scanning a store.
pub trait DerivedView: Send + Sync + 'static {
    /// Reducer producing the view.
    type Reducer: Reducer<Output = Self> + Send;

    /// Returns an empty reducer.
    fn reducer() -> Self::Reducer;

    /// Number of records folded into the view.
    fn record_count(&self) -> usize;
}

/// A cached aggregate.
#[derive(Debug)]
pub struct CacheEntry<V> {
    value: Arc<V>,
    record_count: usize,
    computed_at: Instant,
}

impl<V> CacheEntry<V> {
    /// The cached aggregate.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// Records folded into the aggregate.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// When the aggregate was computed.
    pub fn computed_at(&self) -> Instant {
        self.computed_at
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.record_count > 0 && self.computed_at.elapsed() < ttl
    }
}

impl<V> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            record_count: self.record_count,
            computed_at: self.computed_at,
        }
    }
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    // Bumped by every invalidation; a recompute only stores its result if
    // the generation it started from is still current.
    generations: HashMap<String, u64>,
    epoch: u64,
}

impl<V> CacheState<V> {
    fn generation(&self, db: &str) -> u64 {
        self.epoch + self.generations.get(db).copied().unwrap_or(0)
    }
}

/// TTL cache of a [`DerivedView`] per database.
pub struct ProcessedDataCache<V: DerivedView> {
    pipeline: Arc<BulkPipeline>,
    store: String,
    chunk_size: usize,
    ttl: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V: DerivedView> ProcessedDataCache<V> {
    /// Creates a cache of views over `store`.
    pub fn new(
        pipeline: Arc<BulkPipeline>,
        store: impl Into<String>,
        chunk_size: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            pipeline,
            store: store.into(),
            chunk_size,
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generations: HashMap::new(),
                epoch: 0,
            }),
        }
    }

    /// Store the views are built from.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Returns the view of `db`, recomputing it when stale or forced.
    ///
    /// # Errors
    ///
    /// Propagates connection and reducer errors. A missing store yields an
    /// empty view.
    pub async fn get_derived(&self, db: &str, force_refresh: bool) -> CoreResult<Arc<V>> {
        let generation = {
            let state = self.state.lock();
            if !force_refresh {
                if let Some(entry) = state.entries.get(db) {
                    if entry.is_fresh(self.ttl) {
                        tracing::trace!(db, store = %self.store, "derived view served from cache");
                        return Ok(Arc::clone(&entry.value));
                    }
                }
            }
            state.generation(db)
        };

        let started = Instant::now();
        let value = self
            .pipeline
            .scan_and_reduce(db, &self.store, self.chunk_size, V::reducer())
            .await?;
        let entry = CacheEntry {
            record_count: value.record_count(),
            value: Arc::new(value),
            computed_at: Instant::now(),
        };
        tracing::debug!(
            db,
            store = %self.store,
            records = entry.record_count,
            elapsed = ?started.elapsed(),
            "derived view recomputed"
        );

        let mut state = self.state.lock();
        if state.generation(db) == generation {
            state.entries.insert(db.to_string(), entry.clone());
        } else {
            tracing::debug!(db, "derived view invalidated during recompute, not cached");
        }
        Ok(entry.value)
    }

    /// The current entry of `db`, fresh or not.
    pub fn peek(&self, db: &str) -> Option<CacheEntry<V>> {
        self.state.lock().entries.get(db).cloned()
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.epoch += 1;
    }
}

impl<V: DerivedView> Invalidate for ProcessedDataCache<V> {
    fn invalidate(&self, db: &str) {
        let mut state = self.state.lock();
        state.entries.remove(db);
        *state.generations.entry(db.to_string()).or_insert(0) += 1;
        tracing::trace!(db, "derived view invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, RetryPolicy};
    use crate::error::CoreError;
    use crate::events::ChangeNotifier;
    use crate::migration::Migrator;
    use crate::pipeline::BulkOptions;
    use crate::registry::SchemaRegistry;
    use ratedeck_storage::InMemoryEngine;
    use serde_json::{json, Value};

    #[derive(Debug, PartialEq)]
    struct Total(usize);

    struct TotalReducer(usize);

    impl Reducer for TotalReducer {
        type Output = Total;

        fn reduce_chunk(&mut self, chunk: &[Value]) -> Result<(), CoreError> {
            self.0 += chunk.len();
            Ok(())
        }

        fn finish(self) -> Total {
            Total(self.0)
        }
    }

    impl DerivedView for Total {
        type Reducer = TotalReducer;

        fn reducer() -> TotalReducer {
            TotalReducer(0)
        }

        fn record_count(&self) -> usize {
            self.0
        }
    }

    fn setup(ttl: Duration) -> (Arc<BulkPipeline>, Arc<ProcessedDataCache<Total>>) {
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(InMemoryEngine::new()),
            Arc::new(SchemaRegistry::default()),
            RetryPolicy::no_retry(),
        ));
        let notifier = ChangeNotifier::default();
        let migrator = Arc::new(Migrator::new(connections.clone(), notifier.clone()));
        let pipeline = Arc::new(BulkPipeline::new(connections, migrator, notifier, 100, 4));
        let cache = Arc::new(ProcessedDataCache::new(pipeline.clone(), "items", 10, ttl));
        let weak = Arc::downgrade(&cache) as std::sync::Weak<dyn Invalidate>;
        pipeline.register_invalidator(weak);
        (pipeline, cache)
    }

    async fn write(pipeline: &BulkPipeline, n: usize) {
        let rows = (0..n).map(|i| json!({ "n": i })).collect();
        pipeline
            .bulk_store("rates", "items", rows, BulkOptions::append())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn writes_invalidate_the_view() {
        let (pipeline, cache) = setup(Duration::from_secs(300));
        write(&pipeline, 5).await;
        assert_eq!(*cache.get_derived("rates", false).await.unwrap(), Total(5));

        write(&pipeline, 3).await;
        assert!(cache.peek("rates").is_none());
        assert_eq!(*cache.get_derived("rates", false).await.unwrap(), Total(8));
    }

    #[tokio::test]
    async fn fresh_entry_is_reused() {
        let (pipeline, cache) = setup(Duration::from_secs(300));
        write(&pipeline, 5).await;

        let first = cache.get_derived("rates", false).await.unwrap();
        let second = cache.get_derived("rates", false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let forced = cache.get_derived("rates", true).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &forced));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let (pipeline, cache) = setup(Duration::from_secs(60));
        write(&pipeline, 5).await;

        let first = cache.get_derived("rates", false).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(Arc::ptr_eq(&first, &cache.get_derived("rates", false).await.unwrap()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!Arc::ptr_eq(&first, &cache.get_derived("rates", false).await.unwrap()));
    }

    #[tokio::test]
    async fn empty_view_is_never_served() {
        let (_, cache) = setup(Duration::from_secs(300));
        let first = cache.get_derived("rates", false).await.unwrap();
        assert_eq!(*first, Total(0));
        assert_eq!(cache.peek("rates").unwrap().record_count(), 0);

        let second = cache.get_derived("rates", false).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidate_all_drops_everything() {
        let (pipeline, cache) = setup(Duration::from_secs(300));
        write(&pipeline, 1).await;
        cache.get_derived("rates", false).await.unwrap();

        cache.invalidate_all();
        assert!(cache.peek("rates").is_none());
    }
}
