//! Background services run by the Pingora server next to the proxy.
//!
//! Each one ticks on its own interval until the server signals shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pingora_core::server::ShutdownWatch;
use pingora_core::services::background::BackgroundService;
use tokio::time::MissedTickBehavior;

use crate::access_log::AccessLogWorker;
use crate::cache::CacheSweeper;
use crate::rate_limit::MemoryCounterStore;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Deletes expired composites.
pub struct CacheSweepService {
    sweeper: CacheSweeper,
    interval: Duration,
}

impl CacheSweepService {
    pub fn new(sweeper: CacheSweeper, interval: Duration) -> Self {
        Self { sweeper, interval }
    }
}

#[async_trait]
impl BackgroundService for CacheSweepService {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Cache sweeper started");
        let mut interval = ticker(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweeper.sweep().await {
                        tracing::warn!(error = %e, "Cache sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("Cache sweeper stopped");
                    return;
                }
            }
        }
    }
}

/// Drops idle in-process rate-limit buckets.
pub struct BucketCleanupService {
    store: Arc<MemoryCounterStore>,
    interval: Duration,
}

impl BucketCleanupService {
    pub fn new(store: Arc<MemoryCounterStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl BackgroundService for BucketCleanupService {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let mut interval = ticker(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.store.cleanup();
                    if removed > 0 {
                        tracing::debug!(
                            removed,
                            tracked = self.store.tracked_buckets(),
                            "Cleaned up idle rate limit buckets"
                        );
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// Drains the access-log channel into the store and the detector.
pub struct AccessLogService {
    worker: AccessLogWorker,
}

impl AccessLogService {
    pub fn new(worker: AccessLogWorker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl BackgroundService for AccessLogService {
    async fn start(&self, shutdown: ShutdownWatch) {
        self.worker.run(shutdown).await;
    }
}
