//! Fixed-Window Quotas per Identity and Route Class
//!
//! Every request increments a counter keyed by `(route_class, identifier)` and
//! compares the new count to the effective limit. Increment and compare are a
//! single atomic step against the [`CounterStore`], so concurrent requests on
//! one bucket are linearized and exactly `limit` of them are admitted per
//! window.
//!
//! ## Identifiers
//!
//! Authenticated requests are counted per account id, anonymous requests per
//! client IP (see `AccessIdentity::rate_limit_identifier`).
//!
//! ## Effective Limit
//!
//! `floor(quota * tier.rate_multiplier)` when the route class has
//! `tier_multiplier: true`, otherwise `quota`; never below 1.
//!
//! ## Process-wide Shield
//!
//! An optional `governor` token bucket caps total requests per second for the
//! whole instance before any per-identity accounting happens.
//!
//! ## Configuration Example
//!
//! ```yaml
//! rate_limit:
//!   backend: memory        # memory | redis
//!   route_classes:
//!     image_view:  { quota: 120, window_secs: 60, tier_multiplier: true }
//!     download:    { quota: 20,  window_secs: 60, tier_multiplier: true }
//!     auth:        { quota: 10,  window_secs: 60, tier_multiplier: false }
//!     generic_api: { quota: 300, window_secs: 60, tier_multiplier: true }
//! ```

pub mod redis;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::redis::RedisCounterStore;
pub use store::MemoryCounterStore;

/// Request category with its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteClass {
    ImageView,
    Download,
    Auth,
    GenericApi,
}

impl RouteClass {
    pub const ALL: [RouteClass; 4] = [
        RouteClass::ImageView,
        RouteClass::Download,
        RouteClass::Auth,
        RouteClass::GenericApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::ImageView => "image_view",
            RouteClass::Download => "download",
            RouteClass::Auth => "auth",
            RouteClass::GenericApi => "generic_api",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_tier_multiplier() -> bool {
    true
}

/// Quota and window for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteClassConfig {
    pub quota: u32,
    pub window_secs: u64,
    /// Scale the quota by the tier's rate multiplier.
    #[serde(default = "default_tier_multiplier")]
    pub tier_multiplier: bool,
}

impl RouteClassConfig {
    /// Built-in quota for a route class.
    pub fn default_for(class: RouteClass) -> Self {
        let (quota, tier_multiplier) = match class {
            RouteClass::ImageView => (120, true),
            RouteClass::Download => (20, true),
            RouteClass::Auth => (10, false),
            RouteClass::GenericApi => (300, true),
        };
        Self {
            quota,
            window_secs: 60,
            tier_multiplier,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Limit after applying the tier multiplier.
    pub fn effective_limit(&self, rate_multiplier: f64) -> u64 {
        if !self.tier_multiplier {
            return (self.quota as u64).max(1);
        }
        let multiplier = if rate_multiplier.is_finite() && rate_multiplier > 0.0 {
            rate_multiplier
        } else {
            1.0
        };
        ((self.quota as f64 * multiplier).floor() as u64).max(1)
    }

    pub fn validate(&self, class: RouteClass) -> Result<(), String> {
        if self.quota == 0 {
            return Err(format!("rate_limit.route_classes.{}.quota must be > 0", class));
        }
        if self.window_secs == 0 {
            return Err(format!(
                "rate_limit.route_classes.{}.window_secs must be > 0",
                class
            ));
        }
        Ok(())
    }
}

/// State of a bucket right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Count including this increment.
    pub count: u64,
    /// Wall-clock start of the window (unix ms).
    pub window_start_ms: i64,
    /// Time until the window resets.
    pub resets_in: Duration,
}

#[derive(Error, Debug, Clone)]
pub enum RateLimitError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counters with per-key TTL.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, starting a new window of length `window`
    /// when none is active.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, RateLimitError>;

    fn backend_name(&self) -> &'static str;
}

/// Result of one quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub limit: u64,
    pub count: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Whole seconds until the window resets (at least 1).
    pub retry_after_secs: u64,
}

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-identity, per-route-class quota enforcement.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    classes: HashMap<RouteClass, RouteClassConfig>,
    shield: Option<DirectLimiter>,
}

impl RateLimiter {
    /// Create a limiter. Route classes missing from `classes` use their
    /// built-in quota.
    pub fn new(
        store: Arc<dyn CounterStore>,
        classes: HashMap<RouteClass, RouteClassConfig>,
        global_rps: Option<u32>,
    ) -> Self {
        let mut resolved = HashMap::new();
        for class in RouteClass::ALL {
            let config = classes
                .get(&class)
                .copied()
                .unwrap_or_else(|| RouteClassConfig::default_for(class));
            resolved.insert(class, config);
        }

        let shield = global_rps
            .and_then(NonZeroU32::new)
            .map(|rps| governor::RateLimiter::direct(Quota::per_second(rps)));

        Self {
            store,
            classes: resolved,
            shield,
        }
    }

    pub fn route_class_config(&self, class: RouteClass) -> RouteClassConfig {
        self.classes
            .get(&class)
            .copied()
            .unwrap_or_else(|| RouteClassConfig::default_for(class))
    }

    /// Counter key for a bucket.
    pub fn bucket_key(class: RouteClass, identifier: &str) -> String {
        format!("rl:{}:{}", class.as_str(), identifier)
    }

    /// Process-wide requests-per-second check; always true when disabled.
    pub fn check_shield(&self) -> bool {
        match &self.shield {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Count one request for `identifier` in `class` and decide whether it is
    /// admitted.
    ///
    /// Rejected requests still count, so a client hammering past its limit
    /// cannot sneak in before the window resets.
    pub async fn check_and_increment(
        &self,
        identifier: &str,
        class: RouteClass,
        rate_multiplier: f64,
    ) -> Result<RateLimitOutcome, RateLimitError> {
        let config = self.route_class_config(class);
        let limit = config.effective_limit(rate_multiplier);
        let key = Self::bucket_key(class, identifier);

        let snapshot = self.store.increment(&key, config.window()).await?;

        let allowed = snapshot.count <= limit;
        let retry_after_secs = ceil_secs(snapshot.resets_in).max(1);

        if !allowed {
            tracing::debug!(
                identifier = identifier,
                route_class = class.as_str(),
                count = snapshot.count,
                limit = limit,
                retry_after_secs = retry_after_secs,
                "Rate limit exceeded"
            );
        }

        Ok(RateLimitOutcome {
            allowed,
            limit,
            count: snapshot.count,
            remaining: limit.saturating_sub(snapshot.count),
            retry_after_secs,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
