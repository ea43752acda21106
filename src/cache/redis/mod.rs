// Redis cache index
//
// Shares composite records between gateway instances.
// Layout:
// - `{prefix}:wm:{asset}:{identity}`: MessagePack record, PX TTL = time to expiry
// - `{prefix}:wm:expiry`: sorted set, score = expires_at ms, member = JSON record
//
// The primary key expiring on its own is the lazy eviction of stale reads;
// the sorted set keeps every generation around until the sweeper deletes its
// bytes.

pub mod serialization;

use crate::cache::{CacheError, CacheIndex, CacheKey, InsertOutcome, WatermarkCacheEntry};
use crate::config::RedisConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use serialization::{deserialize_entry, expiry_member, serialize_entry};
use std::future::Future;

// KEYS[1] entry, KEYS[2] expiry set
// ARGV[1] record, ARGV[2] ttl ms, ARGV[3] score, ARGV[4] member
const INSERT_IF_ABSENT_SCRIPT: &str = r#"
local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
if ok then
  redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
  return {1, ''}
end
return {0, redis.call('GET', KEYS[1])}
"#;

// KEYS[1] entry, KEYS[2] expiry set; ARGV[1] record, ARGV[2] member
const PURGE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
end
return redis.call('ZREM', KEYS[2], ARGV[2])
"#;

pub struct RedisCacheIndex {
    connection: ConnectionManager,
    config: RedisConfig,
    insert_script: Script,
    purge_script: Script,
}

impl RedisCacheIndex {
    pub async fn new(config: RedisConfig) -> Result<Self, CacheError> {
        let connection = config.connect().await.map_err(|e| {
            CacheError::IndexUnavailable(format!("Failed to connect to Redis: {}", e))
        })?;

        Ok(Self {
            connection,
            config,
            insert_script: Script::new(INSERT_IF_ABSENT_SCRIPT),
            purge_script: Script::new(PURGE_SCRIPT),
        })
    }

    fn entry_key(&self, key: &CacheKey) -> String {
        self.config.key(&["wm", &key.asset_id, &key.identity_id])
    }

    fn expiry_key(&self) -> String {
        self.config.key(&["wm", "expiry"])
    }

    async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.config.operation_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(operation = operation, error = %e, "Redis cache index operation failed");
                Err(CacheError::IndexUnavailable(e.to_string()))
            }
            Err(_) => {
                tracing::error!(operation = operation, "Redis cache index operation timed out");
                Err(CacheError::IndexUnavailable(format!("{} timed out", operation)))
            }
        }
    }
}

#[async_trait]
impl CacheIndex for RedisCacheIndex {
    async fn get(&self, key: &CacheKey) -> Result<Option<WatermarkCacheEntry>, CacheError> {
        let mut conn = self.connection.clone();
        let redis_key = self.entry_key(key);
        let bytes: Option<Vec<u8>> = self
            .run("get", async {
                redis::cmd("GET").arg(&redis_key).query_async(&mut conn).await
            })
            .await?;

        bytes.map(|b| deserialize_entry(&b)).transpose()
    }

    async fn insert_if_absent(&self, entry: WatermarkCacheEntry) -> Result<InsertOutcome, CacheError> {
        let ttl_ms = (entry.expires_at - Utc::now()).num_milliseconds();
        if ttl_ms <= 0 {
            return Ok(InsertOutcome::Expired);
        }

        let record = serialize_entry(&entry)?;
        let member = expiry_member(&entry)?;
        let entry_key = self.entry_key(&entry.key());
        let expiry_key = self.expiry_key();
        let mut conn = self.connection.clone();

        let (committed, existing): (i64, Vec<u8>) = self
            .run("insert_if_absent", async {
                self.insert_script
                    .key(&entry_key)
                    .key(&expiry_key)
                    .arg(&record)
                    .arg(ttl_ms)
                    .arg(entry.expires_at_ms())
                    .arg(&member)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        if committed == 1 {
            Ok(InsertOutcome::Committed)
        } else {
            Ok(InsertOutcome::Existing(deserialize_entry(&existing)?))
        }
    }

    async fn expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WatermarkCacheEntry>, CacheError> {
        let expiry_key = self.expiry_key();
        let max = format!("({}", cutoff.timestamp_millis());
        let mut conn = self.connection.clone();

        let members: Vec<String> = self
            .run("expired_before", async {
                redis::cmd("ZRANGEBYSCORE")
                    .arg(&expiry_key)
                    .arg("-inf")
                    .arg(&max)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(limit)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let mut entries = Vec::with_capacity(members.len());
        for member in members {
            match serde_json::from_str::<WatermarkCacheEntry>(&member) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // Unreadable member: drop it so it does not block the sweep.
                    tracing::warn!(error = %e, "Discarding malformed expiry record");
                    let mut conn = self.connection.clone();
                    let _: Result<i64, CacheError> = self
                        .run("zrem", async {
                            redis::cmd("ZREM")
                                .arg(&expiry_key)
                                .arg(&member)
                                .query_async(&mut conn)
                                .await
                        })
                        .await;
                }
            }
        }
        Ok(entries)
    }

    async fn purge(&self, entry: &WatermarkCacheEntry) -> Result<(), CacheError> {
        let record = serialize_entry(entry)?;
        let member = expiry_member(entry)?;
        let entry_key = self.entry_key(&entry.key());
        let expiry_key = self.expiry_key();
        let mut conn = self.connection.clone();

        let _: i64 = self
            .run("purge", async {
                self.purge_script
                    .key(&entry_key)
                    .key(&expiry_key)
                    .arg(&record)
                    .arg(&member)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn entry_count(&self) -> Result<usize, CacheError> {
        let expiry_key = self.expiry_key();
        let mut conn = self.connection.clone();
        self.run("zcard", async {
            redis::cmd("ZCARD").arg(&expiry_key).query_async(&mut conn).await
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
