//! Redis counter store shared by every gateway instance.
//!
//! One Lua script per request: `INCR`, arm `PEXPIRE` on the first hit of a
//! window, read `PTTL`. Redis runs scripts atomically, so the increment and
//! the TTL read can never interleave with another instance's increment.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::{CounterSnapshot, CounterStore, RateLimitError};
use crate::config::RedisConfig;

const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if count == 1 or ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

pub struct RedisCounterStore {
    connection: ConnectionManager,
    config: RedisConfig,
    script: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisConfig) -> Result<Self, RateLimitError> {
        let connection = config
            .connect()
            .await
            .map_err(|e| RateLimitError::Unavailable(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self::with_connection(connection, config))
    }

    pub fn with_connection(connection: ConnectionManager, config: RedisConfig) -> Self {
        Self {
            connection,
            config,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        // Bucket keys are already "rl:{class}:{identifier}"
        match key.split_once(':') {
            Some((namespace, rest)) => match rest.split_once(':') {
                Some((class, identifier)) => self.config.key(&[namespace, class, identifier]),
                None => self.config.key(&[namespace, rest]),
            },
            None => self.config.key(&[key]),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, RateLimitError> {
        let window_ms = window.as_millis().max(1) as i64;
        let redis_key = self.redis_key(key);
        let mut conn = self.connection.clone();

        let invocation = async {
            let result: (i64, i64) = self
                .script
                .key(&redis_key)
                .arg(window_ms)
                .invoke_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(result)
        };

        let (count, ttl_ms) = match tokio::time::timeout(self.config.operation_timeout(), invocation).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(key = %redis_key, error = %e, "Redis rate limit increment failed");
                return Err(RateLimitError::Unavailable(e.to_string()));
            }
            Err(_) => {
                tracing::error!(key = %redis_key, "Redis rate limit increment timed out");
                return Err(RateLimitError::Unavailable("operation timed out".to_string()));
            }
        };

        let ttl_ms = ttl_ms.clamp(0, window_ms);
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(CounterSnapshot {
            count: count.max(0) as u64,
            window_start_ms: now_ms - (window_ms - ttl_ms),
            resets_in: Duration::from_millis(ttl_ms as u64),
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
