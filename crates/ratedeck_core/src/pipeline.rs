//! Chunked bulk ingest and chunked scan-and-reduce.
//!
//! Ingest splits records into fixed-size batches written one after another,
//! yielding to the scheduler every few batches. There is no transaction
//! across batches: a failing batch stops the run, and the batches before it
//! stay committed.
//!
//! The read direction walks a store in `offset`/`limit` chunks and folds
//! each chunk into a [`Reducer`], so peak memory is bounded by the chunk
//! size rather than the table size.

use crate::connection::ConnectionManager;
use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::migration::Migrator;
use parking_lot::RwLock;
use ratedeck_storage::{ScanRequest, StorageError};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Folds chunks of records into an aggregate.
pub trait Reducer {
    /// The aggregate produced.
    type Output;

    /// Folds one chunk into the accumulator.
    fn reduce_chunk(&mut self, chunk: &[Value]) -> CoreResult<()>;

    /// Returns the aggregate.
    fn finish(self) -> Self::Output;
}

/// Something that must forget derived data when a database is written.
pub trait Invalidate: Send + Sync {
    /// Drops whatever is cached for `db`.
    fn invalidate(&self, db: &str);
}

/// Options for [`BulkPipeline::bulk_store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOptions {
    /// Clear the store before writing.
    pub replace_existing: bool,
    /// Use the light batch size; meant for small records.
    pub light: bool,
    /// Override the configured batch size.
    pub batch_size: Option<usize>,
}

impl BulkOptions {
    /// Append to existing records.
    pub fn append() -> Self {
        Self::default()
    }

    /// Replace all existing records.
    pub fn replace() -> Self {
        Self {
            replace_existing: true,
            ..Self::default()
        }
    }

    /// Uses the pipeline's light batch size.
    #[must_use]
    pub fn light(mut self) -> Self {
        self.light = true;
        self
    }

    /// Uses `size` records per batch.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}

/// Summary of a completed bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Records written.
    pub rows_written: usize,
    /// Batches written.
    pub batches: usize,
}

/// Bulk ingest and chunked reduction over shared connections.
pub struct BulkPipeline {
    connections: Arc<ConnectionManager>,
    migrator: Arc<Migrator>,
    notifier: ChangeNotifier,
    batch_size: usize,
    light_batch_size: usize,
    yield_every: usize,
    invalidators: RwLock<Vec<Weak<dyn Invalidate>>>,
}

impl BulkPipeline {
    /// Creates a pipeline.
    pub fn new(
        connections: Arc<ConnectionManager>,
        migrator: Arc<Migrator>,
        notifier: ChangeNotifier,
        batch_size: usize,
        yield_every: usize,
    ) -> Self {
        Self {
            connections,
            migrator,
            notifier,
            batch_size: batch_size.max(1),
            light_batch_size: batch_size.max(1),
            yield_every: yield_every.max(1),
            invalidators: RwLock::new(Vec::new()),
        }
    }

    /// Sets the batch size used by [`BulkOptions::light`] runs.
    #[must_use]
    pub fn with_light_batch_size(mut self, size: usize) -> Self {
        self.light_batch_size = size.max(1);
        self
    }

    /// Batch size `options` resolves to.
    pub fn batch_size_for(&self, options: &BulkOptions) -> usize {
        match options.batch_size {
            Some(size) => size,
            None if options.light => self.light_batch_size,
            None => self.batch_size,
        }
    }

    /// Registers a cache to invalidate on every write.
    ///
    /// The pipeline keeps a weak reference; dropped caches are pruned.
    pub fn register_invalidator(&self, target: Weak<dyn Invalidate>) {
        self.invalidators.write().push(target);
    }

    /// Invalidates every registered cache for `db`.
    pub fn invalidate(&self, db: &str) {
        let mut invalidators = self.invalidators.write();
        invalidators.retain(|weak| match weak.upgrade() {
            Some(target) => {
                target.invalidate(db);
                true
            }
            None => false,
        });
    }

    /// Writes `records` to `db/store` in batches.
    ///
    /// The store is created if missing. With `replace_existing` the store is
    /// cleared first. Registered caches are invalidated before the first
    /// write and again after the last, whether or not the run succeeded.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Schema`] if the store could not be created
    /// - [`CoreError::Connection`] if the database could not be opened
    /// - [`CoreError::BulkWrite`] naming the failed batch
    pub async fn bulk_store(
        &self,
        db: &str,
        store: &str,
        records: Vec<Value>,
        options: BulkOptions,
    ) -> CoreResult<BulkReport> {
        let batch_size = self.batch_size_for(&options);
        if batch_size == 0 {
            return Err(CoreError::invalid_config("batch size must be greater than 0"));
        }

        self.migrator.try_ensure_store(db, store).await?;
        self.invalidate(db);

        let lease = self.connections.lease(db).await?;
        let mut report = BulkReport::default();

        if options.replace_existing {
            lease
                .clear(store)
                .await
                .map_err(|e| CoreError::from_storage(db, store, e))?;
            self.notifier.publish(ChangeEvent::StoreCleared {
                db: db.to_string(),
                store: store.to_string(),
            });
        }

        let total = records.len();
        let mut rows = records.into_iter();
        let mut result = Ok(());

        loop {
            let batch: Vec<Value> = rows.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let len = batch.len();

            if let Err(source) = lease.put_batch(store, batch).await {
                tracing::error!(
                    db,
                    store,
                    batch = report.batches,
                    committed = report.rows_written,
                    error = %source,
                    "bulk write aborted"
                );
                result = Err(CoreError::BulkWrite {
                    db: db.to_string(),
                    store: store.to_string(),
                    batch_index: report.batches,
                    rows_committed: report.rows_written,
                    source,
                });
                break;
            }

            report.batches += 1;
            report.rows_written += len;
            tracing::debug!(db, store, written = report.rows_written, total, "batch written");

            if report.batches % self.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        drop(lease);
        self.invalidate(db);
        if report.rows_written > 0 {
            self.notifier.publish(ChangeEvent::StoreWritten {
                db: db.to_string(),
                store: store.to_string(),
                rows: report.rows_written,
            });
        }

        result?;
        tracing::info!(db, store, rows = report.rows_written, batches = report.batches, "bulk store complete");
        Ok(report)
    }

    /// Serializes typed records and writes them with [`BulkPipeline::bulk_store`].
    pub async fn bulk_store_records<T: Serialize>(
        &self,
        db: &str,
        store: &str,
        records: &[T],
        options: BulkOptions,
    ) -> CoreResult<BulkReport> {
        let values = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.bulk_store(db, store, values, options).await
    }

    /// Empties `db/store` and invalidates caches. Missing stores are a no-op.
    pub async fn clear_store(&self, db: &str, store: &str) -> CoreResult<()> {
        let lease = self.connections.lease(db).await?;
        let result = match lease.clear(store).await {
            Ok(()) => {
                self.notifier.publish(ChangeEvent::StoreCleared {
                    db: db.to_string(),
                    store: store.to_string(),
                });
                Ok(())
            }
            Err(StorageError::StoreNotFound { .. }) => Ok(()),
            Err(e) => Err(CoreError::from_storage(db, store, e)),
        };
        self.invalidate(db);
        result
    }

    /// Walks `db/store` in chunks of `chunk_size`, folding each into `reducer`.
    ///
    /// A missing store reduces to the reducer's empty output.
    pub async fn scan_and_reduce<R: Reducer>(
        &self,
        db: &str,
        store: &str,
        chunk_size: usize,
        mut reducer: R,
    ) -> CoreResult<R::Output> {
        if chunk_size == 0 {
            return Err(CoreError::invalid_config("chunk size must be greater than 0"));
        }

        let lease = self.connections.lease(db).await?;
        let total = match lease.count(store, None).await {
            Ok(total) => total,
            Err(StorageError::StoreNotFound { .. }) => {
                tracing::debug!(db, store, "store absent, reducing nothing");
                return Ok(reducer.finish());
            }
            Err(e) => return Err(CoreError::from_storage(db, store, e)),
        };

        let mut offset = 0;
        while offset < total {
            let chunk = lease
                .scan(store, ScanRequest::all().offset(offset).limit(chunk_size))
                .await
                .map_err(|e| CoreError::from_storage(db, store, e))?;
            if chunk.is_empty() {
                break;
            }
            reducer.reduce_chunk(&chunk)?;
            offset += chunk_size;
            tracing::debug!(db, store, scanned = offset.min(total), total, "chunk reduced");
            tokio::task::yield_now().await;
        }

        Ok(reducer.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RetryPolicy;
    use crate::registry::SchemaRegistry;
    use ratedeck_storage::InMemoryEngine;
    use serde_json::json;

    struct CountReducer(usize);

    impl Reducer for CountReducer {
        type Output = usize;

        fn reduce_chunk(&mut self, chunk: &[Value]) -> CoreResult<()> {
            self.0 += chunk.len();
            Ok(())
        }

        fn finish(self) -> usize {
            self.0
        }
    }

    fn pipeline(batch_size: usize) -> (Arc<ConnectionManager>, BulkPipeline) {
        light_pipeline(batch_size, batch_size)
    }

    fn light_pipeline(batch_size: usize, light: usize) -> (Arc<ConnectionManager>, BulkPipeline) {
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(InMemoryEngine::new()),
            Arc::new(SchemaRegistry::default()),
            RetryPolicy::no_retry(),
        ));
        let notifier = ChangeNotifier::default();
        let migrator = Arc::new(Migrator::new(connections.clone(), notifier.clone()));
        let pipeline = BulkPipeline::new(connections.clone(), migrator, notifier, batch_size, 2)
            .with_light_batch_size(light);
        (connections, pipeline)
    }

    fn rows(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"n": i})).collect()
    }

    #[tokio::test]
    async fn bulk_store_batches_and_counts() {
        let (connections, pipeline) = pipeline(10);
        let report = pipeline
            .bulk_store("rates", "items", rows(25), BulkOptions::append())
            .await
            .unwrap();

        assert_eq!(report, BulkReport { rows_written: 25, batches: 3 });
        assert_eq!(connections.ref_count("rates"), 0);
    }

    #[tokio::test]
    async fn light_runs_use_light_batch_size() {
        let (_, pipeline) = light_pipeline(4, 10);
        let light = pipeline
            .bulk_store("rates", "codes", rows(25), BulkOptions::replace().light())
            .await
            .unwrap();
        let heavy = pipeline
            .bulk_store("rates", "items", rows(25), BulkOptions::replace())
            .await
            .unwrap();
        let explicit = BulkOptions::append().light().with_batch_size(5);

        assert_eq!(light, BulkReport { rows_written: 25, batches: 3 });
        assert_eq!(heavy.batches, 7);
        assert_eq!(pipeline.batch_size_for(&explicit), 5);
    }

    #[tokio::test]
    async fn replace_existing_clears_first() {
        let (_, pipeline) = pipeline(10);
        pipeline
            .bulk_store("rates", "items", rows(7), BulkOptions::append())
            .await
            .unwrap();
        pipeline
            .bulk_store("rates", "items", rows(4), BulkOptions::replace())
            .await
            .unwrap();

        let total = pipeline
            .scan_and_reduce("rates", "items", 3, CountReducer(0))
            .await
            .unwrap();
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn scan_missing_store_is_empty() {
        let (_, pipeline) = pipeline(10);
        let total = pipeline
            .scan_and_reduce("rates", "nothing", 3, CountReducer(0))
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn zero_sizes_rejected() {
        let (_, pipeline) = pipeline(10);
        let err = pipeline
            .bulk_store("rates", "items", rows(1), BulkOptions::append().with_batch_size(0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));

        let err = pipeline
            .scan_and_reduce("rates", "items", 0, CountReducer(0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn clear_missing_store_is_noop() {
        let (_, pipeline) = pipeline(10);
        pipeline.clear_store("rates", "nothing").await.unwrap();
    }
}
