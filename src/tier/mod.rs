//! Tier policies and the per-request access decision.
//!
//! The resolver is a pure function of (identity, asset, policy table). It is
//! evaluated on every request and nothing it returns is cached, so a standing
//! downgrade or an unpublish takes effect on the very next request.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Asset;
use crate::identity::{AccessIdentity, Standing};

fn default_rate_multiplier() -> f64 {
    1.0
}

/// Static policy for one subscription tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tier_name: String,
    /// Whether this tier receives unmarked originals.
    #[serde(default)]
    pub clean_access: bool,
    /// Ordering of tiers; compared against `Asset::min_tier_rank`.
    #[serde(default)]
    pub rank: u32,
    /// Scales quotas of route classes with `tier_multiplier: true`.
    #[serde(default = "default_rate_multiplier")]
    pub rate_multiplier: f64,
}

/// Why a request was denied. Serialized as the machine-readable reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Banned,
    NotPublished,
    InsufficientTier,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Banned => "banned",
            DenyReason::NotPublished => "not_published",
            DenyReason::InsufficientTier => "insufficient_tier",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of tier resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Clean,
    Watermarked,
    Deny(DenyReason),
}

/// Resolves (tier, standing, asset) to an [`AccessDecision`].
#[derive(Debug, Clone, Default)]
pub struct TierPolicyResolver {
    policies: HashMap<String, TierPolicy>,
}

impl TierPolicyResolver {
    pub fn new(policies: impl IntoIterator<Item = TierPolicy>) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.tier_name.clone(), p))
                .collect(),
        }
    }

    pub fn policy(&self, tier: &str) -> Option<&TierPolicy> {
        self.policies.get(tier)
    }

    /// Rate multiplier for a tier; 1.0 when the tier is unknown or absent.
    pub fn rate_multiplier(&self, tier: Option<&str>) -> f64 {
        tier.and_then(|t| self.policies.get(t))
            .map(|p| p.rate_multiplier)
            .unwrap_or(1.0)
    }

    /// Decide access.
    ///
    /// Checks, in order: standing, publication, tier known, tier rank,
    /// clean access. Standing wins over everything: a banned identity is
    /// denied regardless of tier.
    pub fn resolve(&self, tier: Option<&str>, standing: Standing, asset: &Asset) -> AccessDecision {
        if standing != Standing::Active {
            return AccessDecision::Deny(DenyReason::Banned);
        }

        if !asset.published {
            return AccessDecision::Deny(DenyReason::NotPublished);
        }

        // Unknown tiers fail closed.
        let Some(policy) = tier.and_then(|t| self.policies.get(t)) else {
            return AccessDecision::Deny(DenyReason::InsufficientTier);
        };

        if policy.rank < asset.min_tier_rank {
            return AccessDecision::Deny(DenyReason::InsufficientTier);
        }

        if policy.clean_access {
            AccessDecision::Clean
        } else {
            AccessDecision::Watermarked
        }
    }

    /// Convenience wrapper over [`resolve`](Self::resolve) for an identity.
    pub fn resolve_for(&self, identity: &AccessIdentity, asset: &Asset) -> AccessDecision {
        self.resolve(identity.tier.as_deref(), identity.standing, asset)
    }
}
