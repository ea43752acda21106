//! Watermark cache configuration
//!
//! ```yaml
//! cache:
//!   ttl_secs: 86400
//!   sweep_interval_secs: 60
//!   grace_secs: 300
//!   sweep_batch: 500
//!   index: memory          # memory | redis (uses the top-level `redis` section)
//!   blobs:
//!     backend: memory
//!     max_size_mb: 512
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_TTL_SECS, DEFAULT_SWEEP_BATCH, DEFAULT_SWEEP_GRACE_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::storage::BlobStoreConfig;

/// Where the cache index lives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheIndexBackend {
    #[default]
    Memory,
    Redis,
}

/// Watermark cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkCacheConfig {
    /// Composite lifetime (default: 24h)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Seconds between sweeps (default: 60)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds past expiry before bytes are deleted (default: 300)
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Expired records handled per sweep (default: 500)
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch: usize,

    #[serde(default)]
    pub index: CacheIndexBackend,

    /// Store for composited bytes
    #[serde(default)]
    pub blobs: BlobStoreConfig,
}

impl Default for WatermarkCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            grace_secs: default_grace_secs(),
            sweep_batch: default_sweep_batch(),
            index: CacheIndexBackend::default(),
            blobs: BlobStoreConfig::default(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_grace_secs() -> u64 {
    DEFAULT_SWEEP_GRACE_SECS
}

fn default_sweep_batch() -> usize {
    DEFAULT_SWEEP_BATCH
}

impl WatermarkCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".to_string());
        }
        if self.sweep_batch == 0 {
            return Err("cache.sweep_batch must be > 0".to_string());
        }
        self.blobs
            .validate()
            .map_err(|e| format!("cache.blobs: {}", e))
    }
}
