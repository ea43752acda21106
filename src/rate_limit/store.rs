//! In-process counter store.
//!
//! The map lock is held only to find or insert a bucket; the increment itself
//! happens under that bucket's own mutex, so unrelated identities never
//! contend with each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{CounterSnapshot, CounterStore, RateLimitError};
use crate::constants::{DEFAULT_BUCKET_IDLE_TTL_SECS, DEFAULT_MAX_TRACKED_BUCKETS};

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    window_start_ms: i64,
    window: Duration,
    count: u64,
    last_accessed: Instant,
}

impl Bucket {
    fn new(now: Instant, window: Duration) -> Self {
        Self {
            window_start: now,
            window_start_ms: chrono::Utc::now().timestamp_millis(),
            window,
            count: 0,
            last_accessed: now,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }
}

/// Counter store held in process memory.
pub struct MemoryCounterStore {
    buckets: Arc<RwLock<HashMap<String, Arc<Mutex<Bucket>>>>>,
    idle_ttl: Duration,
    max_tracked: usize,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_limits(
            Duration::from_secs(DEFAULT_BUCKET_IDLE_TTL_SECS),
            DEFAULT_MAX_TRACKED_BUCKETS,
        )
    }

    pub fn with_limits(idle_ttl: Duration, max_tracked: usize) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
            max_tracked,
        }
    }

    fn bucket(&self, key: &str, window: Duration, now: Instant) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write();
        Arc::clone(
            buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::new(now, window)))),
        )
    }

    /// Number of tracked buckets.
    pub fn tracked_buckets(&self) -> usize {
        self.buckets.read().len()
    }

    /// Evict buckets whose window has elapsed and that have been idle for
    /// longer than the idle TTL. Returns the number evicted.
    ///
    /// Two phases: candidates are collected under the read lock, then
    /// re-checked and removed under the write lock. A bucket another task is
    /// holding is never removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let idle_ttl = self.idle_ttl;

        let candidates: Vec<String> = {
            let buckets = self.buckets.read();
            buckets
                .iter()
                .filter(|(_, bucket)| {
                    let b = bucket.lock();
                    b.is_expired(now) && now.duration_since(b.last_accessed) >= idle_ttl
                })
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut buckets = self.buckets.write();
        let mut evicted = 0;
        for key in &candidates {
            let removable = buckets
                .get(key)
                .map(|bucket| Arc::strong_count(bucket) == 1 && bucket.lock().is_expired(now))
                .unwrap_or(false);
            if removable {
                buckets.remove(key);
                evicted += 1;
            }
        }

        // Over capacity: drop every expired bucket regardless of idleness.
        // Live windows are kept so nobody's quota resets early.
        if buckets.len() > self.max_tracked {
            let before = buckets.len();
            buckets.retain(|_, bucket| Arc::strong_count(bucket) > 1 || !bucket.lock().is_expired(now));
            evicted += before - buckets.len();
            tracing::warn!(
                tracked = buckets.len(),
                max_tracked = self.max_tracked,
                "Rate limit buckets exceed max after idle cleanup, evicted all expired windows"
            );
        }

        if evicted > 0 {
            tracing::debug!(
                evicted_buckets = evicted,
                remaining_buckets = buckets.len(),
                "Evicted idle rate limit buckets"
            );
        }
        evicted
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, RateLimitError> {
        let now = Instant::now();
        let bucket = self.bucket(key, window, now);
        let mut b = bucket.lock();

        if b.is_expired(now) || b.window != window {
            *b = Bucket::new(now, window);
        }
        b.count += 1;
        b.last_accessed = now;

        let elapsed = now.duration_since(b.window_start);
        Ok(CounterSnapshot {
            count: b.count,
            window_start_ms: b.window_start_ms,
            resets_in: b.window.saturating_sub(elapsed),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
