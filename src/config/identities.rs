//! Identity directory and asset catalog sources.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{Asset, MemoryAssetCatalog};
use crate::identity::{
    AccessIdentity, HttpDirectoryConfig, HttpIdentityDirectory, IdentityDirectory, IdentityError,
    MemoryIdentityDirectory,
};

/// Where account identities come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum IdentitiesConfig {
    /// Accounts listed in the configuration
    Memory {
        #[serde(default)]
        seed: Vec<AccessIdentity>,
    },
    /// The identity service's REST API
    Http(HttpDirectoryConfig),
}

impl Default for IdentitiesConfig {
    fn default() -> Self {
        IdentitiesConfig::Memory { seed: Vec::new() }
    }
}

impl IdentitiesConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            IdentitiesConfig::Memory { .. } => "memory",
            IdentitiesConfig::Http(_) => "http",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            IdentitiesConfig::Memory { seed } => {
                if let Some(identity) = seed.iter().find(|i| i.id.is_empty()) {
                    return Err(format!(
                        "identities.seed: identity with tier {:?} has an empty id",
                        identity.tier
                    ));
                }
                Ok(())
            }
            IdentitiesConfig::Http(http) => {
                if !(http.url.starts_with("http://") || http.url.starts_with("https://")) {
                    return Err(format!(
                        "identities.url must start with http:// or https://, got '{}'",
                        http.url
                    ));
                }
                if http.timeout_secs == 0 {
                    return Err("identities.timeout_secs must be greater than 0".to_string());
                }
                Ok(())
            }
        }
    }

    pub fn build(&self) -> Result<Arc<dyn IdentityDirectory>, IdentityError> {
        Ok(match self {
            IdentitiesConfig::Memory { seed } => Arc::new(
                MemoryIdentityDirectory::with_identities(seed.iter().cloned()),
            ),
            IdentitiesConfig::Http(http) => Arc::new(HttpIdentityDirectory::new(http)?),
        })
    }
}

/// Assets known at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl CatalogConfig {
    pub fn build(&self) -> MemoryAssetCatalog {
        MemoryAssetCatalog::with_assets(self.assets.iter().cloned())
    }

    pub fn validate(&self) -> Result<(), String> {
        for asset in &self.assets {
            crate::gateway::validate_asset_id(&asset.id)
                .map_err(|_| format!("catalog.assets: invalid asset id '{}'", asset.id))?;
            if asset.storage_key.is_empty() {
                return Err(format!(
                    "catalog.assets.{}: storage_key cannot be empty",
                    asset.id
                ));
            }
        }
        Ok(())
    }
}
