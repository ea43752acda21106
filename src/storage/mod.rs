//! Blob storage for originals and composited bytes.
//!
//! Three backends implement [`BlobStore`]:
//! - [`MemoryBlobStore`]: moka-backed, bounded by total bytes (tests, single node)
//! - [`DiskBlobStore`]: one file per key under a root directory
//! - [`S3BlobStore`]: an S3 (or S3-compatible) bucket
//!
//! Keys are `/`-separated relative paths such as
//! `originals/coll-1/asset-1.jpg` or `composites/asset-1/ab12.../uuid.jpg`.

pub mod config;
pub mod disk;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use config::BlobStoreConfig;
pub use disk::DiskBlobStore;
pub use memory::MemoryBlobStore;
pub use s3::{S3BlobStore, S3StorageConfig};

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Io(_))
    }
}

/// Byte storage addressed by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the whole blob.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Write the blob, replacing any previous bytes under `key`.
    ///
    /// Readers never observe a partially written blob.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Delete the blob. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Short backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape a storage root or address nothing.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
