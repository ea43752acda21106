//! In-process cache index.
//!
//! Records are spread over [`CACHE_INDEX_SHARDS`] independently locked maps so
//! readers of unrelated keys never wait on each other. The expiry index is a
//! `BTreeMap` ordered by `(expires_at, storage_key)`; the sweeper range-scans
//! it instead of walking the shards.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::entry::{CacheKey, WatermarkCacheEntry};
use super::error::CacheError;
use super::traits::{CacheIndex, InsertOutcome};
use crate::constants::CACHE_INDEX_SHARDS;

type ExpiryKey = (i64, String);

pub struct MemoryCacheIndex {
    shards: Vec<RwLock<HashMap<CacheKey, WatermarkCacheEntry>>>,
    expiry: Mutex<BTreeMap<ExpiryKey, WatermarkCacheEntry>>,
}

impl Default for MemoryCacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheIndex {
    pub fn new() -> Self {
        Self {
            shards: (0..CACHE_INDEX_SHARDS)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            expiry: Mutex::new(BTreeMap::new()),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, WatermarkCacheEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn expiry_key(entry: &WatermarkCacheEntry) -> ExpiryKey {
        (entry.expires_at_ms(), entry.composited_storage_key.clone())
    }

    /// Number of live-or-stale primary records across all shards.
    pub fn primary_len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

#[async_trait]
impl CacheIndex for MemoryCacheIndex {
    async fn get(&self, key: &CacheKey) -> Result<Option<WatermarkCacheEntry>, CacheError> {
        Ok(self.shard(key).read().get(key).cloned())
    }

    async fn insert_if_absent(&self, entry: WatermarkCacheEntry) -> Result<InsertOutcome, CacheError> {
        let key = entry.key();
        let mut shard = self.shard(&key).write();

        if let Some(existing) = shard.get(&key) {
            if !existing.is_expired() {
                return Ok(InsertOutcome::Existing(existing.clone()));
            }
        }

        // Lock order: shard, then expiry.
        self.expiry
            .lock()
            .insert(Self::expiry_key(&entry), entry.clone());
        shard.insert(key, entry);
        Ok(InsertOutcome::Committed)
    }

    async fn expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WatermarkCacheEntry>, CacheError> {
        let cutoff_ms = cutoff.timestamp_millis();
        let expiry = self.expiry.lock();
        Ok(expiry
            .values()
            .take_while(|entry| entry.expires_at_ms() < cutoff_ms)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge(&self, entry: &WatermarkCacheEntry) -> Result<(), CacheError> {
        let key = entry.key();
        {
            let mut shard = self.shard(&key).write();
            let same = shard
                .get(&key)
                .map(|current| current.composited_storage_key == entry.composited_storage_key)
                .unwrap_or(false);
            if same {
                shard.remove(&key);
            }
        }
        self.expiry.lock().remove(&Self::expiry_key(entry));
        Ok(())
    }

    async fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.expiry.lock().len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
