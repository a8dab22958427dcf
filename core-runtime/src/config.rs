//! # Configuration Management
//!
//! The tuning surface of the catalog engine. `CoreConfig` carries every
//! knob the sync, dedup, ordering, and prefetch machinery consults, with
//! sane defaults, builder-style setters, serde round-tripping, and a
//! `validate()` gate run before the configuration is handed to the
//! coordinator.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::default()
//!     .with_prefetch_count(5)
//!     .with_hash_concurrency(2);
//!
//! config.validate().expect("invalid configuration");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Buffer size of the broadcast event bus.
    pub event_buffer_size: usize,

    /// Minimum interval between two full reconciliation passes, in
    /// seconds. Bursts of filesystem notifications inside this window are
    /// coalesced into a single pass.
    pub debounce_interval_secs: u64,

    /// Maximum number of files hashed concurrently. Hashing streams file
    /// contents, so this bounds both open file handles and buffer memory.
    pub hash_concurrency: usize,

    /// How many records ahead of the playback cursor the prefetcher
    /// requests downloads for.
    pub prefetch_count: u32,

    /// Minimum interval between job progress log lines, in seconds.
    pub progress_log_interval_secs: u64,

    /// First order value assigned by a sequential ordering pass. The range
    /// below it is reserved for sticky pinning.
    pub sequential_order_base: i64,

    /// Exclusive upper bound for randomly assigned order values. Wide by
    /// default so collisions stay improbable without a shuffle.
    pub random_order_max: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 100,
            debounce_interval_secs: 2,
            hash_concurrency: 3,
            prefetch_count: 3,
            progress_log_interval_secs: 3,
            sequential_order_base: 100,
            random_order_max: i64::MAX / 2,
        }
    }
}

impl CoreConfig {
    /// Parse a configuration from a JSON document.
    ///
    /// Missing fields fall back to their defaults; the result is
    /// validated before being returned.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the event bus buffer size.
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Set the debounce interval between full reconciliation passes.
    pub fn with_debounce_interval_secs(mut self, secs: u64) -> Self {
        self.debounce_interval_secs = secs;
        self
    }

    /// Set the bounded hashing concurrency.
    pub fn with_hash_concurrency(mut self, concurrency: usize) -> Self {
        self.hash_concurrency = concurrency;
        self
    }

    /// Set the prefetch look-ahead count.
    pub fn with_prefetch_count(mut self, count: u32) -> Self {
        self.prefetch_count = count;
        self
    }

    /// Set the minimum interval between progress log lines.
    pub fn with_progress_log_interval_secs(mut self, secs: u64) -> Self {
        self.progress_log_interval_secs = secs;
        self
    }

    /// The debounce interval as a `Duration`.
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_secs(self.debounce_interval_secs)
    }

    /// The progress-log interval as a `Duration`.
    pub fn progress_log_interval(&self) -> Duration {
        Duration::from_secs(self.progress_log_interval_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending field when a value is
    /// out of range.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than zero".to_string(),
            ));
        }

        if self.hash_concurrency == 0 {
            return Err(Error::Config(
                "hash_concurrency must be greater than zero".to_string(),
            ));
        }

        if self.sequential_order_base <= 0 {
            return Err(Error::Config(
                "sequential_order_base must be positive to keep the sticky range reserved"
                    .to_string(),
            ));
        }

        if self.random_order_max <= self.sequential_order_base {
            return Err(Error::Config(
                "random_order_max must exceed sequential_order_base".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = CoreConfig::default()
            .with_event_buffer_size(256)
            .with_debounce_interval_secs(5)
            .with_hash_concurrency(2)
            .with_prefetch_count(10)
            .with_progress_log_interval_secs(1);

        assert_eq!(config.event_buffer_size, 256);
        assert_eq!(config.debounce_interval(), Duration::from_secs(5));
        assert_eq!(config.hash_concurrency, 2);
        assert_eq!(config.prefetch_count, 10);
        assert_eq!(config.progress_log_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_hash_concurrency_rejected() {
        let config = CoreConfig::default().with_hash_concurrency(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let config = CoreConfig::default().with_event_buffer_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_order_range_sanity() {
        let mut config = CoreConfig::default();
        config.random_order_max = config.sequential_order_base;
        assert!(config.validate().is_err());

        config.sequential_order_base = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_partial_document() {
        let config = CoreConfig::from_json(r#"{"prefetch_count": 7}"#).unwrap();
        assert_eq!(config.prefetch_count, 7);
        // Unspecified fields keep their defaults.
        assert_eq!(config.hash_concurrency, CoreConfig::default().hash_concurrency);
    }

    #[test]
    fn test_from_json_invalid_value_rejected() {
        assert!(CoreConfig::from_json(r#"{"hash_concurrency": 0}"#).is_err());
        assert!(CoreConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = CoreConfig::default().with_prefetch_count(9);
        let json = serde_json::to_string(&config).unwrap();
        let back = CoreConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }
}
