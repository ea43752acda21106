//! Content delivery orchestration.
//!
//! One [`DeliveryGateway::deliver`] call per `GET /content/{asset_id}`:
//!
//! 1. validate the asset id
//! 2. process-wide shield, then resolve the requesting identity
//! 3. scraping block list
//! 4. per-identity quota for the route class
//! 5. catalog lookup and tier decision (fresh on every request)
//! 6. clean original, or the identity's cached/generated composite
//! 7. access event handed to the log worker (never awaited)

pub mod response;

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

pub use response::{Delivery, DeliveryType, GatewayResponse};

use crate::access_log::{AccessAction, AccessEvent, AccessLogger};
use crate::cache::{CacheStatus, PrewarmReport, WatermarkCache};
use crate::catalog::{Asset, AssetCatalog};
use crate::detector::AntiScrapingDetector;
use crate::error::DeliveryError;
use crate::identity::{AccessIdentity, IdentityResolver};
use crate::metrics::Metrics;
use crate::rate_limit::{RateLimiter, RouteClass};
use crate::retry::RetryPolicy;
use crate::storage::{BlobStore, StorageError};
use crate::tier::{AccessDecision, TierPolicyResolver};
use crate::watermark::{WatermarkEngine, WatermarkError};

/// Longest accepted asset id
pub const MAX_ASSET_ID_LEN: usize = 128;

/// Accept `[A-Za-z0-9_-]{1,128}`.
pub fn validate_asset_id(asset_id: &str) -> Result<(), DeliveryError> {
    let valid = !asset_id.is_empty()
        && asset_id.len() <= MAX_ASSET_ID_LEN
        && asset_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(DeliveryError::InvalidAssetId(
            asset_id.chars().take(MAX_ASSET_ID_LEN).collect(),
        ))
    }
}

/// One inbound content request.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub asset_id: String,
    /// Bearer token or session cookie value
    pub session_token: Option<String>,
    pub client_ip: IpAddr,
    /// `?download=1`
    pub download: bool,
}

impl ContentRequest {
    pub fn new(asset_id: impl Into<String>, client_ip: IpAddr) -> Self {
        Self {
            asset_id: asset_id.into(),
            session_token: None,
            client_ip,
            download: false,
        }
    }

    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn as_download(mut self) -> Self {
        self.download = true;
        self
    }

    pub fn route_class(&self) -> RouteClass {
        if self.download {
            RouteClass::Download
        } else {
            RouteClass::ImageView
        }
    }
}

/// Collaborators of the gateway.
pub struct GatewayComponents {
    pub identities: IdentityResolver,
    pub tiers: Arc<TierPolicyResolver>,
    pub rate_limiter: Arc<RateLimiter>,
    pub catalog: Arc<dyn AssetCatalog>,
    pub originals: Arc<dyn BlobStore>,
    pub retry: RetryPolicy,
    pub engine: WatermarkEngine,
    pub cache: WatermarkCache,
    pub detector: Option<Arc<AntiScrapingDetector>>,
    pub access_log: AccessLogger,
}

pub struct DeliveryGateway {
    identities: IdentityResolver,
    tiers: Arc<TierPolicyResolver>,
    rate_limiter: Arc<RateLimiter>,
    catalog: Arc<dyn AssetCatalog>,
    originals: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    engine: WatermarkEngine,
    cache: WatermarkCache,
    detector: Option<Arc<AntiScrapingDetector>>,
    access_log: AccessLogger,
}

impl DeliveryGateway {
    pub fn new(components: GatewayComponents) -> Self {
        Self {
            identities: components.identities,
            tiers: components.tiers,
            rate_limiter: components.rate_limiter,
            catalog: components.catalog,
            originals: components.originals,
            retry: components.retry,
            engine: components.engine,
            cache: components.cache,
            detector: components.detector,
            access_log: components.access_log,
        }
    }

    pub fn cache(&self) -> &WatermarkCache {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn detector(&self) -> Option<&Arc<AntiScrapingDetector>> {
        self.detector.as_ref()
    }

    /// Serve a request, folding errors into their JSON responses.
    pub async fn handle(&self, request: ContentRequest) -> GatewayResponse {
        match self.deliver(&request).await {
            Ok(delivery) => delivery.into_response(),
            Err(err) => GatewayResponse::from(&err),
        }
    }

    pub async fn deliver(&self, request: &ContentRequest) -> Result<Delivery, DeliveryError> {
        let started = Instant::now();
        let class = request.route_class();
        let result = self.deliver_inner(request, class).await;

        let metrics = Metrics::global();
        match &result {
            Ok(delivery) => {
                let cache = match delivery.cache_status {
                    Some(CacheStatus::Hit) => "hit",
                    Some(CacheStatus::Miss) => "miss",
                    None => "bypass",
                };
                metrics.record_request(class.as_str(), "ok");
                metrics.record_delivery(delivery.delivery_type.as_str(), cache, started);
            }
            Err(err) => {
                metrics.record_request(class.as_str(), err.reason_code());
                if err.status() >= 500 {
                    tracing::error!(
                        asset_id = %request.asset_id,
                        client_ip = %request.client_ip,
                        reason = err.reason_code(),
                        error = %err,
                        "Content delivery failed"
                    );
                }
            }
        }
        result
    }

    async fn deliver_inner(
        &self,
        request: &ContentRequest,
        class: RouteClass,
    ) -> Result<Delivery, DeliveryError> {
        validate_asset_id(&request.asset_id)?;

        if !self.rate_limiter.check_shield() {
            return Err(DeliveryError::RateLimited { retry_after_secs: 1 });
        }

        let identity = self
            .identities
            .resolve(request.session_token.as_deref(), request.client_ip)
            .await?;

        if self.is_blocked(&identity.id) {
            tracing::info!(identity_id = %identity.id, "Request from blocked identity");
            self.record(&identity, request, AccessAction::Denied, Some("scraping_blocked"));
            return Err(DeliveryError::ScrapingBlocked);
        }

        let multiplier = self.tiers.rate_multiplier(identity.tier.as_deref());
        let outcome = self
            .rate_limiter
            .check_and_increment(&identity.rate_limit_identifier(), class, multiplier)
            .await?;
        if !outcome.allowed {
            tracing::debug!(
                identity_id = %identity.id,
                route_class = class.as_str(),
                limit = outcome.limit,
                retry_after_secs = outcome.retry_after_secs,
                "Rate limit exceeded"
            );
            Metrics::global().record_rate_limit_rejection(class.as_str());
            self.record(&identity, request, AccessAction::RateLimited, None);
            return Err(DeliveryError::RateLimited {
                retry_after_secs: outcome.retry_after_secs,
            });
        }

        let asset = self
            .catalog
            .get(&request.asset_id)
            .await?
            .ok_or_else(|| DeliveryError::AssetNotFound(request.asset_id.clone()))?;

        let delivery = match self.tiers.resolve_for(&identity, &asset) {
            AccessDecision::Deny(reason) => {
                tracing::info!(
                    identity_id = %identity.id,
                    asset_id = %asset.id,
                    tier = identity.tier.as_deref().unwrap_or("none"),
                    reason = reason.as_str(),
                    "Access denied"
                );
                self.record(&identity, request, AccessAction::Denied, Some(reason.as_str()));
                return Err(DeliveryError::Denied(reason));
            }
            AccessDecision::Clean => {
                let bytes = self.read_original(&asset).await?;
                Delivery {
                    asset_id: asset.id.clone(),
                    content_type: response::sniff_content_type(&bytes).to_string(),
                    bytes,
                    delivery_type: DeliveryType::Clean,
                    cache_status: None,
                    download: request.download,
                }
            }
            AccessDecision::Watermarked => {
                let job = self.composite_job(&asset, &identity.id);
                let composite = self
                    .cache
                    .get_or_create(&asset.id, &identity.id, move || job)
                    .await?;
                Delivery {
                    asset_id: asset.id.clone(),
                    bytes: composite.bytes,
                    content_type: composite.content_type,
                    delivery_type: DeliveryType::Watermarked,
                    cache_status: Some(composite.status),
                    download: request.download,
                }
            }
        };

        let action = if request.download {
            AccessAction::Download
        } else {
            AccessAction::View
        };
        self.record(&identity, request, action, None);

        tracing::debug!(
            identity_id = %identity.id,
            asset_id = %asset.id,
            delivery_type = delivery.delivery_type.as_str(),
            cache = delivery.cache_header(),
            bytes = delivery.bytes.len(),
            "Content delivered"
        );
        Ok(delivery)
    }

    /// Generate composites of `asset_id` for `identity_ids` ahead of demand.
    pub async fn prewarm(
        &self,
        asset_id: &str,
        identity_ids: &[String],
    ) -> Result<PrewarmReport, DeliveryError> {
        validate_asset_id(asset_id)?;
        let asset = self
            .catalog
            .get(asset_id)
            .await?
            .ok_or_else(|| DeliveryError::AssetNotFound(asset_id.to_string()))?;

        Ok(self
            .cache
            .prewarm(&asset.id, identity_ids, |identity_id| {
                self.composite_job(&asset, identity_id)
            })
            .await)
    }

    fn is_blocked(&self, identity_id: &str) -> bool {
        self.detector
            .as_ref()
            .map(|detector| detector.is_blocked(identity_id))
            .unwrap_or(false)
    }

    fn record(
        &self,
        identity: &AccessIdentity,
        request: &ContentRequest,
        action: AccessAction,
        reason: Option<&str>,
    ) {
        let mut event = AccessEvent::new(
            &identity.id,
            &request.asset_id,
            action,
            request.client_ip.to_string(),
        );
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        self.access_log.log(event);
    }

    async fn read_original(&self, asset: &Asset) -> Result<Bytes, DeliveryError> {
        let originals = &self.originals;
        let key = asset.storage_key.as_str();
        self.retry
            .run("read_original", || originals.get(key))
            .await
            .map_err(|err| {
                if let StorageError::NotFound(_) = err {
                    tracing::error!(
                        asset_id = %asset.id,
                        storage_key = %asset.storage_key,
                        "Original missing from storage"
                    );
                }
                DeliveryError::from(err)
            })
    }

    /// Read the original and composite the identity's marker onto it.
    /// Owns everything it touches so it can outlive the requesting client.
    fn composite_job(
        &self,
        asset: &Asset,
        identity_id: &str,
    ) -> impl Future<Output = Result<Bytes, WatermarkError>> + Send + 'static {
        let originals = Arc::clone(&self.originals);
        let retry = self.retry.clone();
        let engine = self.engine.clone();
        let asset_id = asset.id.clone();
        let storage_key = asset.storage_key.clone();
        let identity_id = identity_id.to_string();

        async move {
            let source = retry
                .run("read_original", || originals.get(&storage_key))
                .await
                .map_err(|e| WatermarkError::SourceUnavailable(e.to_string()))?;
            engine.composite(source, &asset_id, &identity_id).await
        }
    }
}
