//! Cache statistics
//!
//! - `CacheCounters`: lock-free counters updated on the request path
//! - `CacheStats`: point-in-time snapshot for `/health` and tests

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    generation_failures: AtomicU64,
    coalesced: AtomicU64,
    publish_conflicts: AtomicU64,
    swept: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_conflict(&self) {
        self.publish_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: u64) {
        self.swept.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            publish_conflicts: self.publish_conflicts.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Successful composite generations
    pub generations: u64,
    pub generation_failures: u64,
    /// Requests that waited on another request's generation
    pub coalesced: u64,
    /// Generations discarded because another one committed first
    pub publish_conflicts: u64,
    /// Expired records whose bytes were deleted
    pub swept: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total requests)
    /// Returns 0.0 if there are no requests
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::default();
        assert_eq!(counters.snapshot().hit_rate(), 0.0);

        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_miss();
        assert_eq!(counters.snapshot().hit_rate(), 0.75);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = CacheCounters::default();
        counters.record_generation();
        counters.record_coalesced();
        counters.record_swept(3);
        let stats = counters.snapshot();
        assert_eq!(stats.generations, 1);
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.swept, 3);
    }
}
