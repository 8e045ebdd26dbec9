//! # Ratedeck Core
//!
//! Versioned client-side storage for rate-sheet analytics.
//!
//! This crate sits on top of a [`ratedeck_storage::StorageEngine`] and
//! provides:
//! - Schema versioning with an authoritative per-database log
//! - Reference-counted connections with retry on transient failures
//! - Store migrations that exclude concurrent borrowers
//! - Chunked bulk ingest and chunked scan-and-reduce
//! - A TTL cache of whole-table aggregates
//! - Paginated, filtered, sorted queries with UI-facing state
//!
//! ## Design Principles
//!
//! - No globals: one [`StorageContext`] is built per process and passed
//!   to every consumer
//! - A failed migration leaves the database closed and the schema log at
//!   the previous version
//! - Read paths treat a missing store as an empty result
//! - Memory during reductions is bounded by the chunk size
//!
//! ## Example
//!
//! ```rust,ignore
//! use ratedeck_core::{Config, LergRecord, StorageContext};
//! use ratedeck_storage::InMemoryEngine;
//! use std::sync::Arc;
//!
//! let ctx = StorageContext::new(Arc::new(InMemoryEngine::new()), Config::default())?;
//! ctx.store_lerg(&[LergRecord::new("201", "NJ", "US")], true).await?;
//!
//! let summary = ctx.lerg_summary(false).await?;
//! assert_eq!(summary.region_of("201"), Some("NJ"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod connection;
mod context;
mod error;
mod events;
mod lerg;
mod migration;
mod pipeline;
pub mod query;
mod registry;

pub use cache::{CacheEntry, DerivedView, ProcessedDataCache};
pub use config::Config;
pub use connection::{
    Connection, ConnectionManager, ConnectionState, ConnectionStatus, Lease, RetryPolicy,
};
pub use context::{StorageContext, LERG_DB};
pub use error::{CoreError, CoreResult};
pub use events::{ChangeEvent, ChangeNotifier};
pub use lerg::{
    LergAggregate, LergRecord, LergReducer, CANADA, CANADIAN_PROVINCES, DOMESTIC, LERG_STORE,
    UNKNOWN_REGION,
};
pub use migration::{MigrationOutcome, Migrator};
pub use pipeline::{BulkOptions, BulkPipeline, BulkReport, Invalidate, Reducer};
pub use query::{Filter, PageResult, PageSnapshot, QueryFacade, QuerySpec, SortDirection, SortSpec};
pub use registry::{SchemaDeclaration, SchemaLog, SchemaRegistry, StoreChanges, FALLBACK_INDEX_SPEC};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
