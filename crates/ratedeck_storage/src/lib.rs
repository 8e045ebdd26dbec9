//! # Ratedeck Storage
//!
//! Keyed object-store engine trait and implementations for Ratedeck.
//!
//! This crate provides the lowest-level storage abstraction. An engine
//! holds named, versioned databases; each database holds named stores of
//! JSON records keyed by a primary key, with optional secondary indexes.
//!
//! ## Design Principles
//!
//! - Engines know nothing about schema *history*: they are handed the full
//!   store map for a version and apply it on upgrade
//! - Opening at the stored version never touches the schema
//! - Errors are typed as transient or permanent so callers never have to
//!   guess whether a retry can help
//! - Must be `Send + Sync` for shared access
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - Reference engine for tests and ephemeral data
//!
//! ## Example
//!
//! ```rust
//! use ratedeck_storage::{InMemoryEngine, SchemaMap, StorageEngine, StoreSchema};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let engine = InMemoryEngine::new();
//! let mut stores = SchemaMap::new();
//! stores.insert("lerg".into(), "++id, npa, state".parse().unwrap());
//!
//! engine.open("rates", 1, &stores).await.unwrap();
//! engine.put_batch("rates", "lerg", vec![json!({"npa": "201"})]).await.unwrap();
//! assert_eq!(engine.count("rates", "lerg", None).await.unwrap(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key;
mod memory;
mod schema;

pub use engine::{RecordFilter, ScanRequest, StorageEngine};
pub use error::{classify_message, ErrorKind, StorageError, StorageResult};
pub use key::{compare_values, field_value, Key};
pub use memory::InMemoryEngine;
pub use schema::{PrimaryKey, SchemaMap, StoreSchema};
