//! Process-wide wiring of the storage core.
//!
//! A [`StorageContext`] is built once at startup and handed to every
//! consumer. It owns the connection registry, schema log, migrator, bulk
//! pipeline, change notifier and the LERG cache; nothing in the crate is
//! held in a global.

use crate::cache::ProcessedDataCache;
use crate::config::Config;
use crate::connection::{ConnectionManager, RetryPolicy};
use crate::error::CoreResult;
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::lerg::{LergAggregate, LergRecord, LERG_STORE};
use crate::migration::Migrator;
use crate::pipeline::{BulkOptions, BulkPipeline, BulkReport, Invalidate};
use crate::query::QueryFacade;
use crate::registry::SchemaRegistry;
use ratedeck_storage::StorageEngine;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Database holding LERG data.
pub const LERG_DB: &str = "lerg";

/// Shared handles to every storage component.
pub struct StorageContext {
    config: Config,
    engine: Arc<dyn StorageEngine>,
    connections: Arc<ConnectionManager>,
    migrator: Arc<Migrator>,
    pipeline: Arc<BulkPipeline>,
    notifier: ChangeNotifier,
    lerg_cache: Arc<ProcessedDataCache<LergAggregate>>,
}

impl StorageContext {
    /// Builds a context over `engine`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidConfig`] if `config` fails validation.
    pub fn new(engine: Arc<dyn StorageEngine>, config: Config) -> CoreResult<Self> {
        config.validate()?;

        let registry = Arc::new(SchemaRegistry::new(config.index_defaults.clone()));
        let retry = RetryPolicy::new(config.retry_budget, config.retry_base_delay);
        let connections = Arc::new(ConnectionManager::new(Arc::clone(&engine), registry, retry));
        let notifier = ChangeNotifier::default();
        let migrator = Arc::new(Migrator::new(Arc::clone(&connections), notifier.clone()));
        let pipeline = Arc::new(BulkPipeline::new(
            Arc::clone(&connections),
            Arc::clone(&migrator),
            notifier.clone(),
            config.batch_size,
            config.yield_every_batches,
        )
        .with_light_batch_size(config.light_batch_size));
        let lerg_cache = Arc::new(ProcessedDataCache::new(
            Arc::clone(&pipeline),
            LERG_STORE,
            config.scan_chunk_size,
            config.cache_ttl,
        ));
        let invalidator = Arc::downgrade(&lerg_cache) as Weak<dyn Invalidate>;
        pipeline.register_invalidator(invalidator);

        tracing::debug!(?config, "storage context ready");
        Ok(Self {
            config,
            engine,
            connections,
            migrator,
            pipeline,
            notifier,
            lerg_cache,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The storage engine.
    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// The connection registry.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// The schema log.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.connections.registry()
    }

    /// The migration engine.
    pub fn migrator(&self) -> &Arc<Migrator> {
        &self.migrator
    }

    /// The bulk pipeline.
    pub fn pipeline(&self) -> &Arc<BulkPipeline> {
        &self.pipeline
    }

    /// The LERG cache.
    pub fn lerg_cache(&self) -> &Arc<ProcessedDataCache<LergAggregate>> {
        &self.lerg_cache
    }

    /// Subscribes to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    /// A new query facade over `db/store`.
    pub fn query_facade<T>(&self, db: &str, store: &str) -> QueryFacade<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        QueryFacade::new(Arc::clone(&self.connections), db, store, &self.config)
    }

    /// Stores LERG records in bulk.
    pub async fn store_lerg(&self, records: &[LergRecord], replace_existing: bool) -> CoreResult<BulkReport> {
        let options = BulkOptions {
            replace_existing,
            ..BulkOptions::default()
        };
        self.pipeline
            .bulk_store_records(LERG_DB, LERG_STORE, records, options)
            .await
    }

    /// The LERG aggregate, from cache when fresh.
    pub async fn lerg_summary(&self, force_refresh: bool) -> CoreResult<Arc<LergAggregate>> {
        self.lerg_cache.get_derived(LERG_DB, force_refresh).await
    }

    /// Deletes `db` and forgets everything cached for it.
    pub async fn delete_database(&self, db: &str) -> CoreResult<()> {
        let result = self.migrator.delete_database(db).await;
        self.pipeline.invalidate(db);
        result
    }

    /// Closes every open handle.
    pub fn shutdown(&self) {
        self.connections.shutdown();
        self.lerg_cache.invalidate_all();
    }
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
