// Error types module

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::catalog::CatalogError;
use crate::identity::IdentityError;
use crate::rate_limit::RateLimitError;
use crate::storage::StorageError;
use crate::tier::DenyReason;
use crate::watermark::WatermarkError;

/// Every way a content request can fail.
///
/// Each variant maps to one HTTP status and one stable, machine-readable
/// reason code returned in the JSON error body.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("Invalid asset id: {0}")]
    InvalidAssetId(String),

    #[error("Invalid session credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Access denied: {0}")]
    Denied(DenyReason),

    #[error("Access blocked after automated access was detected")]
    ScrapingBlocked,

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Original storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Watermark composition failed: {0}")]
    WatermarkFailed(String),

    #[error("Rate limiter unavailable: {0}")]
    RateLimiterUnavailable(String),

    #[error("Watermark cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Identity directory unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("Asset catalog unavailable: {0}")]
    CatalogUnavailable(String),
}

impl DeliveryError {
    /// HTTP status code
    pub fn status(&self) -> u16 {
        match self {
            DeliveryError::InvalidAssetId(_) => 400,
            DeliveryError::InvalidCredentials(_) | DeliveryError::UnknownIdentity(_) => 401,
            DeliveryError::Denied(_) | DeliveryError::ScrapingBlocked => 403,
            DeliveryError::AssetNotFound(_) | DeliveryError::NotFound(_) => 404,
            DeliveryError::RateLimited { .. } => 429,
            DeliveryError::StorageUnavailable(_)
            | DeliveryError::WatermarkFailed(_)
            | DeliveryError::RateLimiterUnavailable(_)
            | DeliveryError::CacheUnavailable(_)
            | DeliveryError::IdentityUnavailable(_)
            | DeliveryError::CatalogUnavailable(_) => 503,
        }
    }

    /// Stable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            DeliveryError::InvalidAssetId(_) => "invalid_asset_id",
            DeliveryError::InvalidCredentials(_) => "invalid_credentials",
            DeliveryError::UnknownIdentity(_) => "unknown_identity",
            DeliveryError::Denied(reason) => reason.as_str(),
            DeliveryError::ScrapingBlocked => "scraping_blocked",
            DeliveryError::RateLimited { .. } => "rate_limited",
            DeliveryError::AssetNotFound(_) => "asset_not_found",
            DeliveryError::NotFound(_) => "not_found",
            DeliveryError::StorageUnavailable(_) => "storage_unavailable",
            DeliveryError::WatermarkFailed(_) => "watermark_failed",
            DeliveryError::RateLimiterUnavailable(_) => "rate_limiter_unavailable",
            DeliveryError::CacheUnavailable(_) => "cache_unavailable",
            DeliveryError::IdentityUnavailable(_) => "identity_unavailable",
            DeliveryError::CatalogUnavailable(_) => "catalog_unavailable",
        }
    }

    /// Seconds for the `Retry-After` header, if any
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            DeliveryError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Message safe to show to clients. Backend details of 5xx errors stay
    /// in the logs.
    pub fn public_message(&self) -> String {
        match self.status() {
            503 => match self {
                DeliveryError::WatermarkFailed(_) => {
                    "The protected copy could not be generated".to_string()
                }
                _ => "A backing service is temporarily unavailable".to_string(),
            },
            _ => self.to_string(),
        }
    }

    /// JSON error body
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.reason_code(),
            message: self.public_message(),
            status: self.status(),
        }
    }
}

/// `{"error": <reason_code>, "message": <text>, "status": <code>}`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub status: u16,
}

impl ErrorBody {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","message":"","status":{}}}"#,
                self.error, self.status
            )
        })
    }
}

impl From<IdentityError> for DeliveryError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidCredentials(msg) => DeliveryError::InvalidCredentials(msg),
            IdentityError::UnknownIdentity(id) => DeliveryError::UnknownIdentity(id),
            IdentityError::Unavailable(msg) => DeliveryError::IdentityUnavailable(msg),
        }
    }
}

impl From<RateLimitError> for DeliveryError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Unavailable(msg) => DeliveryError::RateLimiterUnavailable(msg),
        }
    }
}

impl From<CatalogError> for DeliveryError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unavailable(msg) => DeliveryError::CatalogUnavailable(msg),
        }
    }
}

impl From<StorageError> for DeliveryError {
    fn from(err: StorageError) -> Self {
        DeliveryError::StorageUnavailable(err.to_string())
    }
}

impl From<WatermarkError> for DeliveryError {
    fn from(err: WatermarkError) -> Self {
        DeliveryError::WatermarkFailed(err.to_string())
    }
}

impl From<CacheError> for DeliveryError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Generation(WatermarkError::SourceUnavailable(msg)) => {
                DeliveryError::StorageUnavailable(msg)
            }
            CacheError::Generation(e) => DeliveryError::WatermarkFailed(e.to_string()),
            CacheError::TaskFailed(msg) => DeliveryError::WatermarkFailed(msg),
            other => DeliveryError::CacheUnavailable(other.to_string()),
        }
    }
}
