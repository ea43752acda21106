// Shared Redis connection settings

use std::io;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_REDIS_KEY_PREFIX;

/// Keys longer than this are hashed
pub const MAX_KEY_LENGTH: usize = 250;

/// Redis connection used by the shared watermark cache index and the shared
/// rate-limit counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Key prefix (default: "kagami")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout in milliseconds (default: 5000)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-operation timeout in milliseconds (default: 2000)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_key_prefix() -> String {
    DEFAULT_REDIS_KEY_PREFIX.to_string()
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

fn default_operation_timeout_ms() -> u64 {
    2000
}

impl RedisConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_key_prefix(),
            connection_timeout_ms: default_connection_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err(format!(
                "redis.url must start with redis:// or rediss://, got '{}'",
                self.url
            ));
        }
        if self.key_prefix.is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return Err("redis.key_prefix must be non-empty and contain no whitespace".to_string());
        }
        if self.connection_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err("redis timeouts must be > 0".to_string());
        }
        Ok(())
    }

    /// Open a multiplexed, auto-reconnecting connection.
    pub async fn connect(&self) -> Result<ConnectionManager, RedisError> {
        let client = Client::open(self.url.as_str())?;
        let timeout = Duration::from_millis(self.connection_timeout_ms);
        match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("Redis connection timed out after {}ms", self.connection_timeout_ms),
            )
            .into()),
        }
    }

    /// Build a key `{prefix}:{segment}:{segment}...`, URL-encoding each
    /// segment. Keys over [`MAX_KEY_LENGTH`] become `{prefix}:hash:{sha256}`.
    pub fn key(&self, segments: &[&str]) -> String {
        let mut key = self.key_prefix.clone();
        for segment in segments {
            key.push(':');
            key.push_str(&urlencoding::encode(segment));
        }

        if key.len() <= MAX_KEY_LENGTH {
            return key;
        }

        let mut hasher = Sha256::new();
        for segment in segments {
            hasher.update(segment.as_bytes());
            hasher.update(b":");
        }
        format!("{}:hash:{}", self.key_prefix, hex::encode(hasher.finalize()))
    }
}
