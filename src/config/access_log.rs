//! Access event log settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ACCESS_LOG_CAPACITY, DEFAULT_PRUNE_INTERVAL_SECS};

fn default_channel_capacity() -> usize {
    DEFAULT_ACCESS_LOG_CAPACITY
}

fn default_prune_interval_secs() -> u64 {
    DEFAULT_PRUNE_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    /// Events buffered between the request path and the worker; further
    /// events are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Seconds between retention prunes
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl AccessLogConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channel_capacity == 0 {
            return Err("access_log.channel_capacity must be greater than 0".to_string());
        }
        if self.prune_interval_secs == 0 {
            return Err("access_log.prune_interval_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}
