//! Expired composite sweeper.
//!
//! Walks the expiry index in batches, deletes the bytes of records that
//! expired more than `grace` ago, then purges the records. Only the expiry
//! index and the blob store are touched, so reads of live keys proceed
//! undisturbed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::error::CacheError;
use super::stats::CacheCounters;
use super::traits::CacheIndex;
use crate::metrics::Metrics;
use crate::storage::BlobStore;

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records whose bytes were deleted and whose record was purged
    pub purged: usize,
    /// Records left for the next pass because the blob delete failed
    pub deferred: usize,
}

pub struct CacheSweeper {
    index: Arc<dyn CacheIndex>,
    blobs: Arc<dyn BlobStore>,
    counters: Arc<CacheCounters>,
    grace: Duration,
    batch: usize,
}

impl CacheSweeper {
    pub fn new(
        index: Arc<dyn CacheIndex>,
        blobs: Arc<dyn BlobStore>,
        counters: Arc<CacheCounters>,
        grace: Duration,
        batch: usize,
    ) -> Self {
        Self {
            index,
            blobs,
            counters,
            grace,
            batch: batch.max(1),
        }
    }

    /// Sweep one batch.
    pub async fn sweep_once(&self) -> Result<SweepReport, CacheError> {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - grace;
        let expired = self.index.expired_before(cutoff, self.batch).await?;

        let mut report = SweepReport::default();
        for entry in expired {
            match self.blobs.delete(&entry.composited_storage_key).await {
                Ok(()) => {
                    self.index.purge(&entry).await?;
                    report.purged += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        storage_key = %entry.composited_storage_key,
                        error = %e,
                        "Failed to delete expired composite, will retry next sweep"
                    );
                    report.deferred += 1;
                }
            }
        }

        if report.purged > 0 {
            self.counters.record_swept(report.purged as u64);
            Metrics::global()
                .cache_operations
                .with_label_values(&["swept"])
                .inc_by(report.purged as u64);
            tracing::debug!(
                purged = report.purged,
                deferred = report.deferred,
                "Swept expired composites"
            );
        }
        Ok(report)
    }

    /// Sweep until a pass finds less than a full batch, so a backlog drains
    /// within one tick.
    pub async fn sweep(&self) -> Result<SweepReport, CacheError> {
        let mut total = SweepReport::default();
        loop {
            let report = self.sweep_once().await?;
            total.purged += report.purged;
            total.deferred += report.deferred;
            if report.purged + report.deferred < self.batch || report.purged == 0 {
                return Ok(total);
            }
        }
    }
}
