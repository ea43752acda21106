//! Original image storage.

use serde::{Deserialize, Serialize};

use super::retry::RetryConfigYaml;
use crate::storage::BlobStoreConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store holding the originals referenced by `Asset::storage_key`
    #[serde(default)]
    pub originals: BlobStoreConfig,

    /// Retry of transient read failures
    #[serde(default)]
    pub retry: RetryConfigYaml,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.originals
            .validate()
            .map_err(|e| format!("storage.originals: {}", e))?;
        self.retry.validate()
    }
}
