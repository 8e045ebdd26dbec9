//! Benchmark utilities.

use ratedeck_core::{Config, LergRecord, StorageContext};
use ratedeck_storage::InMemoryEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const STATES: [&str; 8] = ["NJ", "NY", "TX", "CA", "ON", "QC", "BC", "FL"];

/// A context over a fresh in-memory engine, without retry or display delays.
pub fn context() -> StorageContext {
    let config = Config::new()
        .retry_base_delay(Duration::ZERO)
        .min_filter_display(Duration::ZERO);
    StorageContext::new(Arc::new(InMemoryEngine::new()), config)
        .expect("benchmark configuration should be valid")
}

/// A current-thread runtime for driving async code from `b.iter`.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime should build")
}

/// Generate LERG rows spread over domestic and Canadian regions.
pub fn lerg_rows(count: usize) -> Vec<LergRecord> {
    (0..count)
        .map(|i| {
            let state = STATES[i % STATES.len()];
            let country = if matches!(state, "ON" | "QC" | "BC") { "CA" } else { "US" };
            LergRecord::new(format!("{}", 200 + i % 800), state, country)
        })
        .collect()
}

/// Generate rate-deck rows with a scattered rate column.
pub fn deck_rows(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let npa = 200 + i % 800;
            json!({
                "npanxx": format!("{npa}{:03}", i % 1000),
                "npa": npa.to_string(),
                "state": STATES[i % STATES.len()],
                "inter_rate": ((i * 7919) % 5000) as f64 / 10_000.0,
                "carrier": format!("carrier-{}", (i * 31) % 97),
            })
        })
        .collect()
}
