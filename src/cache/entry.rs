//! Cache key and entry types
//!
//! - `CacheKey`: identity-scoped key of a composite (asset + identity)
//! - `WatermarkCacheEntry`: index record pointing at a composite's stored bytes

use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Cache key of one composite.
/// Scoped to the identity, never to the tier: two identities of the same tier
/// get separate entries.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub asset_id: String,
    pub identity_id: String,
}

impl CacheKey {
    pub fn new(asset_id: impl Into<String>, identity_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            identity_id: identity_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            urlencoding::encode(&self.asset_id),
            urlencoding::encode(&self.identity_id)
        )
    }
}

/// Persisted index record of a composite.
///
/// Timestamps are stored as unix milliseconds so the record serializes to the
/// same bytes every time (the Redis expiry set relies on that).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkCacheEntry {
    pub asset_id: String,
    pub identity_id: String,
    pub composited_storage_key: String,
    pub content_type: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl WatermarkCacheEntry {
    /// New entry created now and living for `ttl`.
    pub fn new(
        key: &CacheKey,
        composited_storage_key: String,
        content_type: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let created_at = now
            .duration_trunc(ChronoDuration::milliseconds(1))
            .unwrap_or(now);
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(365));
        Self {
            asset_id: key.asset_id.clone(),
            identity_id: key.identity_id.clone(),
            composited_storage_key,
            content_type: content_type.into(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(&self.asset_id, &self.identity_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at.timestamp_millis()
    }
}

/// Blob key for a new generation of a composite:
/// `composites/{asset}/{sha256(identity)[..16]}/{uuid}.{ext}`.
///
/// Each generation gets its own key, so a regeneration never overwrites bytes
/// the sweeper is about to delete.
pub fn composite_storage_key(key: &CacheKey, extension: &str) -> String {
    let identity_hash = hex::encode(Sha256::digest(key.identity_id.as_bytes()));
    format!(
        "composites/{}/{}/{}.{}",
        key.asset_id,
        &identity_hash[..16],
        uuid::Uuid::new_v4(),
        extension
    )
}
