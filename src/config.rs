//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for datastore credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryPolicies,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // Load API credentials from environment if not set
        if let Ok(api_key) = std::env::var("DATASTORE_API_KEY") {
            config.datastore.api_key = Some(api_key);
        }

        Ok(config)
    }
}

/// Remote datastore endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        DatastoreConfig {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Record store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of records held before eviction kicks in
    pub max_records: usize,
    /// Records processed per batch during bulk load / merge
    pub batch_size: usize,
    /// Seconds a full load stays HOT before degrading to WARM
    pub freshness_window_secs: i64,
    /// Seconds between incremental delta fetches
    pub incremental_interval_secs: i64,
    /// Occupancy fraction past which eviction fires
    pub cleanup_threshold: f64,
    /// Fraction of occupancy removed per eviction pass
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_records: 500,
            batch_size: 50,
            freshness_window_secs: 300,
            incremental_interval_secs: 60,
            cleanup_threshold: 0.8,
            eviction_fraction: 0.2,
        }
    }
}

/// Backoff tuning for one classified error kind.
///
/// Kept as independent per-kind tuples rather than one shared policy;
/// the tuning differs deliberately between transport and API failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter: bool,
}

/// Per-kind retry policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicies {
    pub network: BackoffConfig,
    pub api: BackoffConfig,
    pub cache: BackoffConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        RetryPolicies {
            network: BackoffConfig {
                max_attempts: 3,
                base_delay_ms: 1000,
                max_delay_ms: 10_000,
                factor: 2.0,
                jitter: true,
            },
            api: BackoffConfig {
                max_attempts: 2,
                base_delay_ms: 2000,
                max_delay_ms: 8_000,
                factor: 2.0,
                jitter: false,
            },
            cache: BackoffConfig {
                max_attempts: 1,
                base_delay_ms: 500,
                max_delay_ms: 500,
                factor: 1.0,
                jitter: false,
            },
        }
    }
}

/// Local snapshot persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Enable seeding the store from the last persisted snapshot
    pub enabled: bool,
    /// SQLite database path holding the snapshot slot
    pub db_path: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            enabled: true,
            db_path: "state/snapshot.db".to_string(),
        }
    }
}
