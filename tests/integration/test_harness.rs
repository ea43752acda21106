// Test harness: an in-process gateway over memory-backed components

use std::collections::HashMap;
use std::io::Cursor;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::{ImageOutputFormat, Rgb, RgbImage};
use jsonwebtoken::{encode, EncodingKey, Header};
use kagami::access_log::{AccessLog, AccessLogWorker, AccessLogger, MemoryAccessLog};
use kagami::cache::{MemoryCacheIndex, WatermarkCache};
use kagami::catalog::{Asset, MemoryAssetCatalog};
use kagami::detector::{AntiScrapingDetector, DetectorConfig};
use kagami::gateway::{ContentRequest, DeliveryGateway, GatewayComponents, GatewayResponse};
use kagami::identity::{
    AccessIdentity, IdentityResolver, MemoryIdentityDirectory, SessionConfig, SessionResolver,
    Standing,
};
use kagami::rate_limit::{MemoryCounterStore, RateLimiter, RouteClass, RouteClassConfig};
use kagami::retry::RetryPolicy;
use kagami::storage::{BlobStore, MemoryBlobStore};
use kagami::tier::{TierPolicy, TierPolicyResolver};
use kagami::watermark::{WatermarkConfig, WatermarkEngine};
use serde_json::json;
use tokio::sync::watch;

pub const JWT_SECRET: &str = "integration-jwt-secret";
pub const MARK_SECRET: &str = "integration-mark-secret";

pub struct HarnessOptions {
    pub route_classes: HashMap<RouteClass, RouteClassConfig>,
    pub detector: DetectorConfig,
    pub global_rps: Option<u32>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            route_classes: HashMap::new(),
            detector: DetectorConfig::default(),
            global_rps: None,
        }
    }
}

impl HarnessOptions {
    pub fn with_quota(mut self, class: RouteClass, quota: u32, window_secs: u64) -> Self {
        self.route_classes.insert(
            class,
            RouteClassConfig {
                quota,
                window_secs,
                tier_multiplier: true,
            },
        );
        self
    }
}

pub struct TestGateway {
    pub gateway: Arc<DeliveryGateway>,
    pub originals: Arc<MemoryBlobStore>,
    pub composites: Arc<MemoryBlobStore>,
    pub index: Arc<MemoryCacheIndex>,
    pub catalog: Arc<MemoryAssetCatalog>,
    pub directory: Arc<MemoryIdentityDirectory>,
    pub log: Arc<MemoryAccessLog>,
    shutdown: watch::Sender<bool>,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub fn source_jpeg(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 96])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Jpeg(90)).unwrap();
    Bytes::from(out.into_inner())
}

pub fn asset(id: &str, min_tier_rank: u32) -> Asset {
    Asset {
        id: id.to_string(),
        storage_key: format!("originals/{}.jpg", id),
        width: 320,
        height: 240,
        owning_collection_id: "collection-1".to_string(),
        published: true,
        min_tier_rank,
    }
}

pub fn token(sub: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + 3600;
    encode(
        &Header::default(),
        &json!({ "sub": sub, "exp": exp }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn client_ip() -> IpAddr {
    "203.0.113.10".parse().unwrap()
}

/// `GET /content/{asset_id}` as `identity`
pub fn request(asset_id: &str, identity: &str) -> ContentRequest {
    ContentRequest::new(asset_id, client_ip()).with_session(token(identity))
}

pub fn json_body(response: &GatewayResponse) -> serde_json::Value {
    serde_json::from_slice(&response.body).unwrap()
}

impl TestGateway {
    pub async fn start() -> Self {
        Self::start_with(HarnessOptions::default()).await
    }

    /// Tiers: bronze (rank 1), silver (rank 2, 2x quota), gold (rank 3, clean).
    /// Identities: alice and bob (bronze), sam (silver), gwen (gold),
    /// ben (bronze, banned).
    /// Assets: a1, a2 (any tier), premium (rank 3), draft (unpublished),
    /// corrupt (garbage bytes), missing (no original).
    pub async fn start_with(options: HarnessOptions) -> Self {
        let originals = Arc::new(MemoryBlobStore::new(64 * 1024 * 1024));
        let composites = Arc::new(MemoryBlobStore::new(64 * 1024 * 1024));
        let index = Arc::new(MemoryCacheIndex::new());

        let directory = Arc::new(MemoryIdentityDirectory::with_identities([
            AccessIdentity::new("alice", "bronze", Standing::Active),
            AccessIdentity::new("bob", "bronze", Standing::Active),
            AccessIdentity::new("sam", "silver", Standing::Active),
            AccessIdentity::new("gwen", "gold", Standing::Active),
            AccessIdentity::new("ben", "bronze", Standing::Banned),
        ]));

        let mut draft = asset("draft", 0);
        draft.published = false;
        let catalog = Arc::new(MemoryAssetCatalog::with_assets([
            asset("a1", 0),
            asset("a2", 0),
            asset("premium", 3),
            draft,
            asset("corrupt", 0),
            asset("missing", 0),
        ]));

        for id in ["a1", "a2", "premium", "draft"] {
            originals
                .put(&format!("originals/{}.jpg", id), source_jpeg(320, 240), "image/jpeg")
                .await
                .unwrap();
        }
        originals
            .put(
                "originals/corrupt.jpg",
                Bytes::from_static(b"\xff\xd8\xff\xe0 definitely not a jpeg"),
                "image/jpeg",
            )
            .await
            .unwrap();

        let tiers = TierPolicyResolver::new([
            TierPolicy {
                tier_name: "bronze".to_string(),
                clean_access: false,
                rank: 1,
                rate_multiplier: 1.0,
            },
            TierPolicy {
                tier_name: "silver".to_string(),
                clean_access: false,
                rank: 2,
                rate_multiplier: 2.0,
            },
            TierPolicy {
                tier_name: "gold".to_string(),
                clean_access: true,
                rank: 3,
                rate_multiplier: 4.0,
            },
        ]);

        let session = SessionResolver::new(&SessionConfig::with_secret(JWT_SECRET));
        let identities = IdentityResolver::new(Some(session), directory.clone(), None);

        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            options.route_classes,
            options.global_rps,
        ));

        let engine = WatermarkEngine::new(&WatermarkConfig::with_secret(MARK_SECRET), None).unwrap();
        let cache = WatermarkCache::new(
            index.clone(),
            composites.clone(),
            Duration::from_secs(3600),
            engine.output_format(),
        );

        let log = Arc::new(MemoryAccessLog::new());
        let detector = Arc::new(AntiScrapingDetector::new(
            options.detector,
            log.clone(),
            directory.clone(),
        ));
        let (access_logger, receiver) = AccessLogger::channel(1024);
        let worker = AccessLogWorker::new(
            receiver,
            log.clone(),
            Some(detector.clone()),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move { worker.run(shutdown_rx).await });

        let gateway = Arc::new(DeliveryGateway::new(GatewayComponents {
            identities,
            tiers: Arc::new(tiers),
            rate_limiter,
            catalog: catalog.clone(),
            originals: originals.clone(),
            retry: RetryPolicy::new(2, 1, 5),
            engine,
            cache,
            detector: Some(detector),
            access_log: access_logger,
        }));

        Self {
            gateway,
            originals,
            composites,
            index,
            catalog,
            directory,
            log,
            shutdown,
        }
    }

    pub async fn get(&self, asset_id: &str, identity: &str) -> GatewayResponse {
        self.gateway.handle(request(asset_id, identity)).await
    }

    /// Wait until the access-log worker has stored `count` events.
    pub async fn wait_for_events(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.log.event_count().await.unwrap() >= count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "access log worker did not catch up"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
