//! Asset metadata and publication state.
//!
//! Publication is owned by the external scheduling workflow; the gateway only
//! reads it. The in-memory catalog can be seeded from configuration and
//! updated at runtime (e.g. by a publishing webhook).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An immutable original image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    /// Key of the original in the originals blob store.
    pub storage_key: String,
    pub width: u32,
    pub height: u32,
    pub owning_collection_id: String,
    #[serde(default = "default_published")]
    pub published: bool,
    /// Minimum tier rank entitled to the collection (0 = every tier).
    #[serde(default)]
    pub min_tier_rank: u32,
}

fn default_published() -> bool {
    true
}

#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    #[error("Catalog backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// Look up an asset; `Ok(None)` when it does not exist.
    async fn get(&self, asset_id: &str) -> Result<Option<Asset>, CatalogError>;
}

/// Catalog held in process memory.
#[derive(Default)]
pub struct MemoryAssetCatalog {
    assets: RwLock<HashMap<String, Asset>>,
}

impl MemoryAssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assets(assets: impl IntoIterator<Item = Asset>) -> Self {
        let catalog = Self::new();
        for asset in assets {
            catalog.upsert(asset);
        }
        catalog
    }

    pub fn upsert(&self, asset: Asset) {
        self.assets.write().insert(asset.id.clone(), asset);
    }

    /// Flip the publication flag; returns false when the asset is unknown.
    pub fn set_published(&self, asset_id: &str, published: bool) -> bool {
        match self.assets.write().get_mut(asset_id) {
            Some(asset) => {
                asset.published = published;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetCatalog for MemoryAssetCatalog {
    async fn get(&self, asset_id: &str) -> Result<Option<Asset>, CatalogError> {
        Ok(self.assets.read().get(asset_id).cloned())
    }
}
