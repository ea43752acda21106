//! Component wiring.
//!
//! [`initialize`] builds every collaborator of the gateway from a validated
//! [`Config`]. It is async because the Redis connection managers and the S3
//! clients are created on a runtime; `main` runs it on a support runtime
//! before handing the results to the Pingora server.

use std::sync::Arc;

use anyhow::Context;

use super::services::{AccessLogService, BucketCleanupService, CacheSweepService};
use crate::access_log::{AccessLog, AccessLogWorker, AccessLogger, MemoryAccessLog};
use crate::cache::{CacheIndex, CacheIndexBackend, MemoryCacheIndex, RedisCacheIndex, WatermarkCache};
use crate::config::{Config, CounterBackend};
use crate::detector::AntiScrapingDetector;
use crate::gateway::{DeliveryGateway, GatewayComponents};
use crate::identity::{IdentityResolver, SessionResolver};
use crate::rate_limit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore};
use crate::storage::s3::build_client;
use crate::watermark::WatermarkEngine;

/// Everything the server needs: the gateway and its background services.
pub struct KagamiComponents {
    pub gateway: Arc<DeliveryGateway>,
    pub cache_sweep: CacheSweepService,
    /// Present only with in-process counters
    pub bucket_cleanup: Option<BucketCleanupService>,
    pub access_log: AccessLogService,
}

async fn initialize_counter_store(
    config: &Config,
) -> anyhow::Result<(Arc<dyn CounterStore>, Option<BucketCleanupService>)> {
    match config.rate_limit.backend {
        CounterBackend::Memory => {
            let store = Arc::new(MemoryCounterStore::with_limits(
                config.rate_limit.bucket_idle_ttl(),
                config.rate_limit.max_tracked_buckets,
            ));
            let cleanup =
                BucketCleanupService::new(store.clone(), config.rate_limit.cleanup_interval());
            Ok((store, Some(cleanup)))
        }
        CounterBackend::Redis => {
            let redis = config
                .redis
                .clone()
                .context("rate_limit.backend is redis but no redis section is set")?;
            let store = RedisCounterStore::new(redis)
                .await
                .context("Failed to connect rate limit counters to Redis")?;
            Ok((Arc::new(store), None))
        }
    }
}

async fn initialize_cache_index(config: &Config) -> anyhow::Result<Arc<dyn CacheIndex>> {
    match config.cache.index {
        CacheIndexBackend::Memory => Ok(Arc::new(MemoryCacheIndex::new())),
        CacheIndexBackend::Redis => {
            let redis = config
                .redis
                .clone()
                .context("cache.index is redis but no redis section is set")?;
            let index = RedisCacheIndex::new(redis)
                .await
                .context("Failed to connect cache index to Redis")?;
            Ok(Arc::new(index))
        }
    }
}

/// Build all components from configuration.
pub async fn initialize(config: &Config) -> anyhow::Result<KagamiComponents> {
    let directory = config
        .identities
        .build()
        .context("Failed to build identity directory")?;
    let session = config.session.as_ref().map(SessionResolver::new);
    let identities = IdentityResolver::new(
        session,
        directory.clone(),
        config.tiers.anonymous_tier.clone(),
    );

    let (counter_store, bucket_cleanup) = initialize_counter_store(config).await?;
    let rate_limiter = Arc::new(RateLimiter::new(
        counter_store,
        config.rate_limit.route_classes.clone(),
        config.server.global_rps,
    ));

    let originals = config.storage.originals.build().await;
    let s3_client = match config.storage.originals.s3() {
        Some(s3) => Some(build_client(s3).await),
        None => None,
    };
    let engine = WatermarkEngine::new(&config.watermark, s3_client)
        .context("Failed to initialize watermark engine")?;

    let index = initialize_cache_index(config).await?;
    let blobs = config.cache.blobs.build().await;
    let cache = WatermarkCache::new(index, blobs, config.cache.ttl(), engine.output_format());
    let cache_sweep = CacheSweepService::new(
        cache.sweeper(config.cache.grace(), config.cache.sweep_batch),
        config.cache.sweep_interval(),
    );

    let log: Arc<dyn AccessLog> = Arc::new(MemoryAccessLog::new());
    let detector = Arc::new(AntiScrapingDetector::new(
        config.detector.clone(),
        log.clone(),
        directory,
    ));
    let (access_logger, receiver) = AccessLogger::channel(config.access_log.channel_capacity);
    let worker = AccessLogWorker::new(
        receiver,
        log,
        Some(detector.clone()),
        config.detector.retention(),
        config.access_log.prune_interval(),
    );

    let gateway = DeliveryGateway::new(GatewayComponents {
        identities,
        tiers: Arc::new(config.tiers.resolver()),
        rate_limiter: rate_limiter.clone(),
        catalog: Arc::new(config.catalog.build()),
        originals,
        retry: config.storage.retry.to_retry_policy(),
        engine,
        cache,
        detector: Some(detector),
        access_log: access_logger,
    });

    tracing::info!(
        rate_limit_backend = rate_limiter.backend_name(),
        cache_index = ?config.cache.index,
        cache_blobs = config.cache.blobs.backend_name(),
        originals = config.storage.originals.backend_name(),
        identities = config.identities.backend_name(),
        assets = config.catalog.assets.len(),
        "Components initialized"
    );

    Ok(KagamiComponents {
        gateway: Arc::new(gateway),
        cache_sweep,
        bucket_cleanup,
        access_log: AccessLogService::new(worker),
    })
}
