//! Per-identity watermark cache.
//!
//! Memoizes composites keyed by `(asset, identity)`:
//! - metadata in a [`CacheIndex`] (in-memory shards or Redis)
//! - bytes in a [`BlobStore`]
//! - at most one generation in flight per key ([`RequestCoalescer`])
//!
//! Generation runs in a task detached from the requesting client, so a
//! disconnect never cancels work other waiters depend on. Nothing is indexed
//! unless both the composite and the blob write succeed, and the first
//! committed generation of a key wins.

pub mod config;
pub mod entry;
pub mod error;
pub mod memory;
pub mod redis;
pub mod stats;
pub mod sweeper;
pub mod traits;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

pub use self::redis::RedisCacheIndex;
pub use config::{CacheIndexBackend, WatermarkCacheConfig};
pub use entry::{composite_storage_key, CacheKey, WatermarkCacheEntry};
pub use error::CacheError;
pub use memory::MemoryCacheIndex;
pub use stats::{CacheCounters, CacheStats};
pub use sweeper::{CacheSweeper, SweepReport};
pub use traits::{CacheIndex, InsertOutcome};

use crate::metrics::Metrics;
use crate::request_coalescing::{CoalescingSlot, RequestCoalescer};
use crate::storage::{BlobStore, StorageError};
use crate::watermark::{OutputFormat, WatermarkError};

/// How a composite was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from an existing entry
    Hit,
    /// Generated for this request (or a concurrent one it waited on)
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Watermark-Cache` response header.
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit; pre-generated",
            CacheStatus::Miss => "miss; on-the-fly",
        }
    }
}

/// Composite bytes plus where they came from.
#[derive(Debug, Clone)]
pub struct CachedComposite {
    pub bytes: Bytes,
    pub content_type: String,
    pub status: CacheStatus,
}

/// Outcome of [`WatermarkCache::prewarm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrewarmReport {
    pub generated: usize,
    pub already_cached: usize,
    pub failed: usize,
}

struct CacheInner {
    index: Arc<dyn CacheIndex>,
    blobs: Arc<dyn BlobStore>,
    ttl: Duration,
    output_format: OutputFormat,
    counters: Arc<CacheCounters>,
}

#[derive(Clone)]
pub struct WatermarkCache {
    inner: Arc<CacheInner>,
    coalescer: RequestCoalescer<Result<Bytes, CacheError>>,
}

impl WatermarkCache {
    pub fn new(
        index: Arc<dyn CacheIndex>,
        blobs: Arc<dyn BlobStore>,
        ttl: Duration,
        output_format: OutputFormat,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                index,
                blobs,
                ttl,
                output_format,
                counters: Arc::new(CacheCounters::default()),
            }),
            coalescer: RequestCoalescer::new(),
        }
    }

    /// Return the composite for `(asset_id, identity_id)`, generating it with
    /// `generate` on a miss.
    ///
    /// Concurrent callers for the same uncached key share one invocation of
    /// `generate` and all receive its bytes (or its error).
    pub async fn get_or_create<F, Fut>(
        &self,
        asset_id: &str,
        identity_id: &str,
        generate: F,
    ) -> Result<CachedComposite, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Bytes, WatermarkError>> + Send + 'static,
    {
        let key = CacheKey::new(asset_id, identity_id);
        let metrics = Metrics::global();

        if let Some(hit) = self.inner.lookup(&key).await? {
            self.inner.counters.record_hit();
            metrics.record_cache_operation("hit");
            return Ok(hit);
        }

        self.inner.counters.record_miss();
        metrics.record_cache_operation("miss");
        let content_type = self.inner.output_format.content_type().to_string();

        match self.coalescer.acquire(&key.to_string()).await {
            CoalescingSlot::Follower(result) => {
                self.inner.counters.record_coalesced();
                metrics.record_cache_operation("coalesced");
                result.map(|bytes| CachedComposite {
                    bytes,
                    content_type,
                    status: CacheStatus::Miss,
                })
            }
            CoalescingSlot::Leader(guard) => {
                // A generation may have committed between the lookup and
                // taking the slot.
                match self.inner.lookup(&key).await {
                    Ok(Some(hit)) => {
                        guard.complete(Ok(hit.bytes.clone()));
                        return Ok(hit);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        guard.complete(Err(e.clone()));
                        return Err(e);
                    }
                }

                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move {
                    let result = inner.generate_and_publish(&key, generate).await;
                    guard.complete(result.clone());
                    result
                });

                let bytes = task
                    .await
                    .map_err(|e| CacheError::TaskFailed(e.to_string()))??;
                Ok(CachedComposite {
                    bytes,
                    content_type,
                    status: CacheStatus::Miss,
                })
            }
        }
    }

    /// Generate composites for `identity_ids` ahead of demand.
    pub async fn prewarm<F, Fut>(
        &self,
        asset_id: &str,
        identity_ids: &[String],
        generate: F,
    ) -> PrewarmReport
    where
        F: Fn(&str) -> Fut,
        Fut: Future<Output = Result<Bytes, WatermarkError>> + Send + 'static,
    {
        let mut report = PrewarmReport::default();
        for identity_id in identity_ids {
            let fut = generate(identity_id);
            match self.get_or_create(asset_id, identity_id, move || fut).await {
                Ok(composite) if composite.status == CacheStatus::Hit => report.already_cached += 1,
                Ok(_) => report.generated += 1,
                Err(e) => {
                    tracing::warn!(
                        asset_id = asset_id,
                        identity_id = %identity_id,
                        error = %e,
                        "Prewarm generation failed"
                    );
                    report.failed += 1;
                }
            }
        }
        tracing::info!(
            asset_id = asset_id,
            generated = report.generated,
            already_cached = report.already_cached,
            failed = report.failed,
            "Prewarm finished"
        );
        report
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    pub fn index(&self) -> &Arc<dyn CacheIndex> {
        &self.inner.index
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    /// Sweeper over this cache's index and blob store.
    pub fn sweeper(&self, grace: Duration, batch: usize) -> CacheSweeper {
        CacheSweeper::new(
            Arc::clone(&self.inner.index),
            Arc::clone(&self.inner.blobs),
            Arc::clone(&self.inner.counters),
            grace,
            batch,
        )
    }
}

impl CacheInner {
    /// Live entry with readable bytes, if any.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedComposite>, CacheError> {
        let Some(entry) = self.index.get(key).await? else {
            return Ok(None);
        };
        if entry.is_expired() {
            return Ok(None);
        }

        match self.blobs.get(&entry.composited_storage_key).await {
            Ok(bytes) => Ok(Some(CachedComposite {
                bytes,
                content_type: entry.content_type,
                status: CacheStatus::Hit,
            })),
            Err(StorageError::NotFound(_)) => {
                // Dangling record: drop it so the regeneration can commit.
                tracing::warn!(
                    asset_id = %key.asset_id,
                    identity_id = %key.identity_id,
                    storage_key = %entry.composited_storage_key,
                    "Cache entry without stored bytes, treating as miss"
                );
                self.index.purge(&entry).await?;
                Ok(None)
            }
            Err(e) => Err(CacheError::Storage(e)),
        }
    }

    async fn generate_and_publish<F, Fut>(&self, key: &CacheKey, generate: F) -> Result<Bytes, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, WatermarkError>>,
    {
        let metrics = Metrics::global();

        let timer = metrics.start_composite_timer();
        let generated = generate().await;
        drop(timer);

        let bytes = match generated {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.record_generation_failure();
                metrics.record_cache_operation("generation_failure");
                tracing::error!(
                    asset_id = %key.asset_id,
                    identity_id = %key.identity_id,
                    error = %e,
                    "Composite generation failed"
                );
                return Err(CacheError::Generation(e));
            }
        };

        let content_type = self.output_format.content_type();
        let storage_key = composite_storage_key(key, self.output_format.extension());
        if let Err(e) = self.blobs.put(&storage_key, bytes.clone(), content_type).await {
            self.counters.record_generation_failure();
            metrics.record_cache_operation("generation_failure");
            tracing::error!(storage_key = %storage_key, error = %e, "Failed to store composite");
            return Err(CacheError::Storage(e));
        }

        let entry = WatermarkCacheEntry::new(key, storage_key.clone(), content_type, self.ttl);
        match self.index.insert_if_absent(entry).await {
            Ok(InsertOutcome::Committed) => {
                self.counters.record_generation();
                metrics.record_cache_operation("generation");
                tracing::debug!(
                    asset_id = %key.asset_id,
                    identity_id = %key.identity_id,
                    storage_key = %storage_key,
                    "Composite cached"
                );
                Ok(bytes)
            }
            Ok(InsertOutcome::Existing(existing)) => {
                self.counters.record_publish_conflict();
                metrics.record_cache_operation("publish_conflict");
                tracing::debug!(
                    asset_id = %key.asset_id,
                    identity_id = %key.identity_id,
                    winner = %existing.composited_storage_key,
                    "Another generation committed first"
                );
                self.discard_blob(&storage_key).await;
                Ok(bytes)
            }
            Ok(InsertOutcome::Expired) => {
                tracing::debug!(
                    asset_id = %key.asset_id,
                    identity_id = %key.identity_id,
                    "Composite expired before publish"
                );
                self.discard_blob(&storage_key).await;
                Ok(bytes)
            }
            Err(e) => {
                self.discard_blob(&storage_key).await;
                Err(e)
            }
        }
    }

    async fn discard_blob(&self, storage_key: &str) {
        if let Err(e) = self.blobs.delete(storage_key).await {
            tracing::warn!(storage_key = storage_key, error = %e, "Failed to delete unpublished composite");
        }
    }
}
