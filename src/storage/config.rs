//! Blob store selection.
//!
//! ```yaml
//! blobs:
//!   backend: memory      # memory | disk | s3
//!   max_size_mb: 512
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{BlobStore, DiskBlobStore, MemoryBlobStore, S3BlobStore, S3StorageConfig};
use crate::constants::DEFAULT_BLOB_CACHE_SIZE_MB;

fn default_max_size_mb() -> u64 {
    DEFAULT_BLOB_CACHE_SIZE_MB
}

/// Which backend holds a set of blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BlobStoreConfig {
    Memory {
        #[serde(default = "default_max_size_mb")]
        max_size_mb: u64,
    },
    Disk {
        path: PathBuf,
    },
    S3(S3StorageConfig),
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        BlobStoreConfig::Memory {
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl BlobStoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            BlobStoreConfig::Memory { max_size_mb } => {
                if *max_size_mb == 0 {
                    return Err("memory blob store max_size_mb must be > 0".to_string());
                }
                Ok(())
            }
            BlobStoreConfig::Disk { path } => {
                if path.as_os_str().is_empty() {
                    return Err("disk blob store path cannot be empty".to_string());
                }
                Ok(())
            }
            BlobStoreConfig::S3(s3) => s3.validate(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            BlobStoreConfig::Memory { .. } => "memory",
            BlobStoreConfig::Disk { .. } => "disk",
            BlobStoreConfig::S3(_) => "s3",
        }
    }

    /// S3 settings, when this store lives in S3.
    pub fn s3(&self) -> Option<&S3StorageConfig> {
        match self {
            BlobStoreConfig::S3(s3) => Some(s3),
            _ => None,
        }
    }

    /// Construct the configured store.
    pub async fn build(&self) -> Arc<dyn BlobStore> {
        match self {
            BlobStoreConfig::Memory { max_size_mb } => {
                Arc::new(MemoryBlobStore::new(max_size_mb * 1024 * 1024))
            }
            BlobStoreConfig::Disk { path } => Arc::new(DiskBlobStore::new(path.clone())),
            BlobStoreConfig::S3(s3) => Arc::new(S3BlobStore::connect(s3).await),
        }
    }
}
