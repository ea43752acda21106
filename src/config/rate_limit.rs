//! Rate limiting configuration types.
//!
//! - Counter backend (in-process or Redis)
//! - Per-route-class quota table
//! - Idle bucket eviction for the in-process backend

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUCKET_CLEANUP_INTERVAL_SECS, DEFAULT_BUCKET_IDLE_TTL_SECS,
    DEFAULT_MAX_TRACKED_BUCKETS,
};
use crate::rate_limit::{RouteClass, RouteClassConfig};

/// Where counters live
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    /// Counters local to this process
    #[default]
    Memory,
    /// Counters shared by every instance through Redis
    Redis,
}

fn default_bucket_idle_ttl_secs() -> u64 {
    DEFAULT_BUCKET_IDLE_TTL_SECS
}

fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_BUCKET_CLEANUP_INTERVAL_SECS
}

fn default_max_tracked_buckets() -> usize {
    DEFAULT_MAX_TRACKED_BUCKETS
}

/// Rate limiting configuration (YAML format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfigYaml {
    #[serde(default)]
    pub backend: CounterBackend,

    /// Quota per route class; missing classes use built-in quotas
    #[serde(default)]
    pub route_classes: HashMap<RouteClass, RouteClassConfig>,

    /// Idle time before an in-process bucket is evicted (default: 5 minutes)
    #[serde(default = "default_bucket_idle_ttl_secs")]
    pub bucket_idle_ttl_secs: u64,

    /// Seconds between bucket cleanup runs (default: 60)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Tracked bucket count above which cleanup evicts aggressively
    #[serde(default = "default_max_tracked_buckets")]
    pub max_tracked_buckets: usize,
}

impl Default for RateLimitConfigYaml {
    fn default() -> Self {
        Self {
            backend: CounterBackend::default(),
            route_classes: HashMap::new(),
            bucket_idle_ttl_secs: default_bucket_idle_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_tracked_buckets: default_max_tracked_buckets(),
        }
    }
}

impl RateLimitConfigYaml {
    pub fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (class, config) in &self.route_classes {
            config.validate(*class)?;
        }
        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs must be greater than 0".to_string());
        }
        if self.max_tracked_buckets == 0 {
            return Err("rate_limit.max_tracked_buckets must be greater than 0".to_string());
        }
        // An idle bucket must outlive its window, or a quiet client could
        // reset its own count by waiting for eviction.
        let longest_window = RouteClass::ALL
            .iter()
            .map(|class| {
                self.route_classes
                    .get(class)
                    .copied()
                    .unwrap_or_else(|| RouteClassConfig::default_for(*class))
                    .window_secs
            })
            .max()
            .unwrap_or(0);
        if self.bucket_idle_ttl_secs < longest_window {
            return Err(format!(
                "rate_limit.bucket_idle_ttl_secs ({}) must be at least the longest window ({}s)",
                self.bucket_idle_ttl_secs, longest_window
            ));
        }
        Ok(())
    }
}
