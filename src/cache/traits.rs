//! Cache index trait
//!
//! The index maps `(asset, identity)` to the record of its live composite and
//! keeps an expiry-ordered view of every record for the sweeper. Bytes are
//! not stored here; they live in a `BlobStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::entry::{CacheKey, WatermarkCacheEntry};
use super::error::CacheError;

/// Outcome of [`CacheIndex::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was committed and is now the live one.
    Committed,
    /// A live entry already existed and was kept; the new one was discarded.
    Existing(WatermarkCacheEntry),
    /// The entry expired before it could be written; nothing was stored.
    Expired,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Live or stale record for `key`. Callers check expiry themselves.
    async fn get(&self, key: &CacheKey) -> Result<Option<WatermarkCacheEntry>, CacheError>;

    /// Commit `entry` unless a non-expired entry exists for its key.
    ///
    /// An expired entry is replaced; its record stays in the expiry index
    /// until [`purge`](Self::purge) so its bytes get swept.
    async fn insert_if_absent(&self, entry: WatermarkCacheEntry) -> Result<InsertOutcome, CacheError>;

    /// Up to `limit` records that expired before `cutoff`, oldest first.
    async fn expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WatermarkCacheEntry>, CacheError>;

    /// Drop `entry` from the expiry index, and from the primary map when it is
    /// still the record stored there.
    async fn purge(&self, entry: &WatermarkCacheEntry) -> Result<(), CacheError>;

    /// Number of records in the expiry index.
    async fn entry_count(&self) -> Result<usize, CacheError>;

    fn backend_name(&self) -> &'static str;
}
