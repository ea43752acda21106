//! Tier policy table.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::tier::{TierPolicy, TierPolicyResolver};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TiersConfig {
    /// Tier given to requesters without a session; `None` means anonymous
    /// requests are denied with `insufficient_tier`
    #[serde(default)]
    pub anonymous_tier: Option<String>,

    #[serde(default)]
    pub policies: Vec<TierPolicy>,
}

impl TiersConfig {
    pub fn resolver(&self) -> TierPolicyResolver {
        TierPolicyResolver::new(self.policies.iter().cloned())
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for policy in &self.policies {
            if policy.tier_name.is_empty() {
                return Err("tiers.policies: tier_name cannot be empty".to_string());
            }
            if !seen.insert(policy.tier_name.as_str()) {
                return Err(format!(
                    "tiers.policies: duplicate tier '{}'",
                    policy.tier_name
                ));
            }
            if !policy.rate_multiplier.is_finite() || policy.rate_multiplier <= 0.0 {
                return Err(format!(
                    "tiers.policies.{}: rate_multiplier must be a positive number, got {}",
                    policy.tier_name, policy.rate_multiplier
                ));
            }
        }
        if let Some(anonymous) = &self.anonymous_tier {
            if !seen.contains(anonymous.as_str()) {
                return Err(format!(
                    "tiers.anonymous_tier '{}' has no policy",
                    anonymous
                ));
            }
        }
        Ok(())
    }
}
