//! Native store configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [native]
//! reload_interval = "5m"
//!
//! [native.cache]
//! max_entries = 10000
//! ttl = "0s"
//!
//! [native.broadcast]
//! node_timeout = "10s"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the native roles and users stores.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NativeStoreConfig {
    /// Interval between two reload ticks.
    /// A direct backing-store change is picked up at most one interval later.
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,

    /// Cache sizing and expiry.
    pub cache: CacheConfig,

    /// Cluster fan-out of invalidation requests.
    pub broadcast: BroadcastConfig,
}

impl Default for NativeStoreConfig {
    fn default() -> Self {
        Self {
            reload_interval: Duration::from_secs(300), // 5 minutes
            cache: CacheConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

/// Metadata cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached records per store.
    /// Inserting past the bound evicts the least recently fetched entry.
    pub max_entries: usize,

    /// Age after which an entry is treated as a miss.
    /// Zero disables expiry and leaves freshness to the reload scheduler.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    /// Returns the entry TTL, or `None` when expiry is disabled.
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        (!self.ttl.is_zero()).then_some(self.ttl)
    }
}

/// Invalidation broadcast configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// How long to wait for a single node to acknowledge a request.
    #[serde(with = "humantime_serde")]
    pub node_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl NativeStoreConfig {
    /// Creates a configuration with short intervals for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            reload_interval: Duration::from_millis(200),
            cache: CacheConfig::default(),
            broadcast: BroadcastConfig {
                node_timeout: Duration::from_millis(200),
            },
        }
    }

    /// Sets the reload interval.
    #[must_use]
    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `reload_interval` is zero
    /// - `cache.max_entries` is zero
    /// - `broadcast.node_timeout` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reload_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "reload_interval must be > 0".to_string(),
            ));
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.max_entries must be > 0".to_string(),
            ));
        }

        if self.broadcast.node_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "broadcast.node_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = NativeStoreConfig::default();
        assert_eq!(config.reload_interval, Duration::from_secs(300));
        assert!(config.cache.ttl().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_fails_validation() {
        let config = NativeStoreConfig::default().with_reload_interval(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reload_interval"));
    }

    #[test]
    fn test_zero_capacity_fails_validation() {
        let mut config = NativeStoreConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_humantime_durations() {
        let config: NativeStoreConfig = serde_json::from_value(serde_json::json!({
            "reload_interval": "2s",
            "cache": { "ttl": "1m" },
            "broadcast": { "node_timeout": "500ms" }
        }))
        .unwrap();

        assert_eq!(config.reload_interval, Duration::from_secs(2));
        assert_eq!(config.cache.ttl(), Some(Duration::from_secs(60)));
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.broadcast.node_timeout, Duration::from_millis(500));
    }
}
