// Two gateway instances sharing Redis counters and a Redis cache index
// Requires Docker: cargo test --test integration_tests -- --ignored

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kagami::cache::{CacheIndex, CacheKey, RedisCacheIndex, WatermarkCache};
use kagami::config::RedisConfig;
use kagami::rate_limit::{RateLimiter, RedisCounterStore, RouteClass, RouteClassConfig};
use kagami::storage::MemoryBlobStore;
use kagami::watermark::{OutputFormat, WatermarkError};
use testcontainers::{clients::Cli, RunnableImage};
use testcontainers_modules::redis::Redis;

fn classes(quota: u32) -> HashMap<RouteClass, RouteClassConfig> {
    HashMap::from([(
        RouteClass::ImageView,
        RouteClassConfig {
            quota,
            window_secs: 60,
            tier_multiplier: false,
        },
    )])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Docker
async fn test_quota_is_shared_across_instances() {
    let docker = Cli::default();
    let container = docker.run(RunnableImage::from(Redis::default()));
    let url = format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379));

    let mut limiters = Vec::new();
    for _ in 0..2 {
        let store = RedisCounterStore::new(RedisConfig::with_url(url.clone()))
            .await
            .unwrap();
        limiters.push(Arc::new(RateLimiter::new(Arc::new(store), classes(10), None)));
    }

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let limiter = Arc::clone(&limiters[i % 2]);
            tokio::spawn(async move {
                limiter
                    .check_and_increment("alice", RouteClass::ImageView, 1.0)
                    .await
                    .unwrap()
                    .allowed
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_composite_generated_on_one_instance_is_a_hit_on_the_other() {
    let docker = Cli::default();
    let container = docker.run(RunnableImage::from(Redis::default()));
    let url = format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379));

    let blobs = Arc::new(MemoryBlobStore::new(16 * 1024 * 1024));
    let mut caches = Vec::new();
    for _ in 0..2 {
        let index = RedisCacheIndex::new(RedisConfig::with_url(url.clone()))
            .await
            .unwrap();
        caches.push(WatermarkCache::new(
            Arc::new(index),
            blobs.clone(),
            Duration::from_secs(600),
            OutputFormat::Jpeg,
        ));
    }

    let first = caches[0]
        .get_or_create("a1", "alice", || async {
            Ok::<_, WatermarkError>(bytes::Bytes::from_static(b"composite"))
        })
        .await
        .unwrap();
    assert_eq!(first.status, kagami::cache::CacheStatus::Miss);

    let second = caches[1]
        .get_or_create("a1", "alice", || async {
            Err::<bytes::Bytes, _>(WatermarkError::EmptySource)
        })
        .await
        .unwrap();
    assert_eq!(second.status, kagami::cache::CacheStatus::Hit);
    assert_eq!(second.bytes, first.bytes);

    let entry = caches[1]
        .index()
        .get(&CacheKey::new("a1", "alice"))
        .await
        .unwrap()
        .unwrap();
    assert!(entry.composited_storage_key.contains("a1"));
}
