//! Storage core configuration.

use crate::error::{CoreError, CoreResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Tunable constants for the storage core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Records per batch on heavy ingest paths.
    pub batch_size: usize,

    /// Records per batch on light ingest paths (small records).
    pub light_batch_size: usize,

    /// Maximum age of a cached derived view.
    pub cache_ttl: Duration,

    /// Number of retries after a transient open failure.
    pub retry_budget: u32,

    /// Base delay between open retries; attempt `n` waits `n * base`.
    pub retry_base_delay: Duration,

    /// Initial page size of a query facade.
    pub default_page_size: usize,

    /// Page sizes a query facade accepts.
    pub page_size_options: Vec<usize>,

    /// Minimum time the "filtering" flag stays raised.
    pub min_filter_display: Duration,

    /// Yield to the scheduler after this many written batches.
    pub yield_every_batches: usize,

    /// Records per chunk when scanning to build derived views.
    pub scan_chunk_size: usize,

    /// Index specifications keyed by `"db"` or `"db.store"`.
    pub index_defaults: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let index_defaults = [
            ("lerg", "++id, npa, state, country"),
            ("rate_decks", "++id, npanxx, npa, state, inter_rate, intra_rate"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            batch_size: 2_500,
            light_batch_size: 10_000,
            cache_ttl: Duration::from_secs(5 * 60),
            retry_budget: 3,
            retry_base_delay: Duration::from_millis(100),
            default_page_size: 100,
            page_size_options: vec![25, 50, 100, 250, 500],
            min_filter_display: Duration::from_millis(400),
            yield_every_batches: 4,
            scan_chunk_size: 5_000,
            index_defaults,
        }
    }
}

/// The JSON configuration object, camelCase as exposed to hosts.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    batch_size: Option<usize>,
    light_batch_size: Option<usize>,
    #[serde(rename = "cacheTTLms")]
    cache_ttl_ms: Option<u64>,
    retry_budget: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    default_page_size: Option<usize>,
    page_size_options: Option<Vec<usize>>,
    min_filter_display_ms: Option<u64>,
    yield_every_batches: Option<usize>,
    scan_chunk_size: Option<usize>,
    index_defaults: Option<BTreeMap<String, String>>,
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON configuration object over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for malformed JSON, unknown
    /// keys, negative numbers or values that fail [`Config::validate`].
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let file: ConfigFile =
            serde_json::from_str(json).map_err(|e| CoreError::invalid_config(e.to_string()))?;

        let mut config = Self::default();
        if let Some(v) = file.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = file.light_batch_size {
            config.light_batch_size = v;
        }
        if let Some(v) = file.cache_ttl_ms {
            config.cache_ttl = Duration::from_millis(v);
        }
        if let Some(v) = file.retry_budget {
            config.retry_budget = v;
        }
        if let Some(v) = file.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = file.default_page_size {
            config.default_page_size = v;
        }
        if let Some(v) = file.page_size_options {
            config.page_size_options = v;
        }
        if let Some(v) = file.min_filter_display_ms {
            config.min_filter_display = Duration::from_millis(v);
        }
        if let Some(v) = file.yield_every_batches {
            config.yield_every_batches = v;
        }
        if let Some(v) = file.scan_chunk_size {
            config.scan_chunk_size = v;
        }
        if let Some(v) = file.index_defaults {
            config.index_defaults.extend(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 || self.light_batch_size == 0 {
            return Err(CoreError::invalid_config("batch sizes must be greater than 0"));
        }
        if self.default_page_size == 0 {
            return Err(CoreError::invalid_config(
                "default page size must be greater than 0",
            ));
        }
        if self.page_size_options.contains(&0) {
            return Err(CoreError::invalid_config("page size options must be positive"));
        }
        if self.scan_chunk_size == 0 {
            return Err(CoreError::invalid_config(
                "scan chunk size must be greater than 0",
            ));
        }
        if self.yield_every_batches == 0 {
            return Err(CoreError::invalid_config(
                "yield interval must be at least one batch",
            ));
        }
        Ok(())
    }

    /// Page sizes offered to users, always including the default.
    pub fn page_sizes(&self) -> Vec<usize> {
        let mut sizes = self.page_size_options.clone();
        if !sizes.contains(&self.default_page_size) {
            sizes.push(self.default_page_size);
        }
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }

    /// Sets the heavy ingest batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the light ingest batch size.
    #[must_use]
    pub const fn light_batch_size(mut self, size: usize) -> Self {
        self.light_batch_size = size;
        self
    }

    /// Sets the cache time-to-live.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the number of open retries.
    #[must_use]
    pub const fn retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Sets the base retry delay.
    #[must_use]
    pub const fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Sets the default page size.
    #[must_use]
    pub const fn default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the minimum filtering display time.
    #[must_use]
    pub const fn min_filter_display(mut self, duration: Duration) -> Self {
        self.min_filter_display = duration;
        self
    }

    /// Sets the scan chunk size.
    #[must_use]
    pub const fn scan_chunk_size(mut self, size: usize) -> Self {
        self.scan_chunk_size = size;
        self
    }

    /// Adds an index specification for `"db"` or `"db.store"`.
    #[must_use]
    pub fn index_default(mut self, key: impl Into<String>, spec: impl Into<String>) -> Self {
        self.index_defaults.insert(key.into(), spec.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.batch_size, 2_500);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.min_filter_display, Duration::from_millis(400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .batch_size(10)
            .retry_budget(0)
            .default_page_size(25)
            .index_default("rates.codes", "npa");

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retry_budget, 0);
        assert_eq!(config.default_page_size, 25);
        assert_eq!(config.index_defaults["rates.codes"], "npa");
    }

    #[test]
    fn from_json_overrides_defaults() {
        let config = Config::from_json(
            r#"{"batchSize": 500, "cacheTTLms": 1000, "retryBudget": 1,
                "defaultPageSize": 50, "minFilterDisplayMs": 0}"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.cache_ttl, Duration::from_secs(1));
        assert_eq!(config.retry_budget, 1);
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.min_filter_display, Duration::ZERO);
        assert_eq!(config.scan_chunk_size, 5_000);
    }

    #[test]
    fn from_json_rejects_out_of_range() {
        assert!(Config::from_json(r#"{"batchSize": 0}"#).is_err());
        assert!(Config::from_json(r#"{"defaultPageSize": 0}"#).is_err());
        assert!(Config::from_json(r#"{"cacheTTLms": -1}"#).is_err());
        assert!(Config::from_json(r#"{"unknown": 1}"#).is_err());
    }

    #[test]
    fn page_sizes_include_default() {
        let config = Config::new().default_page_size(75);
        assert_eq!(config.page_sizes(), vec![25, 50, 75, 100, 250, 500]);
    }
}
