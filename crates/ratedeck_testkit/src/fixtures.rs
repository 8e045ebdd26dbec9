//! Test fixtures and context helpers.
//!
//! Provides ready-made storage contexts over an in-memory engine, with or
//! without fault injection.

use crate::fault::FaultyEngine;
use ratedeck_core::{BulkOptions, BulkReport, Config, StorageContext};
use ratedeck_storage::InMemoryEngine;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Configuration with short delays so retry paths run quickly.
pub fn fast_config() -> Config {
    Config::new()
        .retry_base_delay(Duration::from_millis(1))
        .min_filter_display(Duration::ZERO)
}

/// A storage context over an in-memory engine.
pub struct TestContext {
    /// The context under test.
    pub ctx: StorageContext,
    /// The engine behind it.
    pub engine: Arc<InMemoryEngine>,
}

impl TestContext {
    /// Creates a context with [`fast_config`].
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a context with `config`.
    pub fn with_config(config: Config) -> Self {
        let engine = Arc::new(InMemoryEngine::new());
        Self::over(engine, config)
    }

    /// Creates a context over an existing engine, as after a restart.
    pub fn over(engine: Arc<InMemoryEngine>, config: Config) -> Self {
        let ctx = StorageContext::new(engine.clone(), config)
            .expect("test configuration should be valid");
        Self { ctx, engine }
    }

    /// Writes `rows` to `db/store`, replacing what was there.
    pub async fn load(&self, db: &str, store: &str, rows: Vec<Value>) -> BulkReport {
        self.ctx
            .pipeline()
            .bulk_store(db, store, rows, BulkOptions::replace())
            .await
            .expect("fixture load should succeed")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestContext {
    type Target = StorageContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

/// A storage context whose engine can be told to fail.
pub struct FaultyContext {
    /// The context under test.
    pub ctx: StorageContext,
    /// The fault-injecting engine behind it.
    pub engine: Arc<FaultyEngine>,
}

impl FaultyContext {
    /// Creates a context with `config` over a fresh faulty engine.
    pub fn with_config(config: Config) -> Self {
        let engine = Arc::new(FaultyEngine::new(InMemoryEngine::new()));
        let ctx = StorageContext::new(engine.clone(), config)
            .expect("test configuration should be valid");
        Self { ctx, engine }
    }
}

impl std::ops::Deref for FaultyContext {
    type Target = StorageContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

/// Runs `f` on a fresh current-thread runtime.
///
/// For property tests, whose bodies are synchronous.
pub fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime should build")
        .block_on(f)
}
