//! # Ratedeck Testkit
//!
//! Test utilities for Ratedeck.
//!
//! This crate provides:
//! - Storage contexts over in-memory and fault-injecting engines
//! - Property-based generators for LERG and rate-deck rows
//! - An engine wrapper that fails opens, batches and scans on demand
//! - Oracles that compute expected results without chunking or indexes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ratedeck_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn summary_matches_oracle() {
//!     let test = TestContext::new();
//!     let rows = lerg_rows(1_000);
//!     test.store_lerg(&rows, true).await.unwrap();
//!     assert_eq!(*test.lerg_summary(false).await.unwrap(), oracle::lerg_aggregate(&rows));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fault;
pub mod fixtures;
pub mod generators;
pub mod oracle;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fault::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::oracle;
}

pub use fault::{FaultyEngine, OpenFault};
pub use fixtures::{block_on, fast_config, FaultyContext, TestContext};
pub use generators::{lerg_rows, PropTestConfig};
