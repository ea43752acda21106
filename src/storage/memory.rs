//! In-memory blob store backed by moka.

use async_trait::async_trait;
use bytes::Bytes;

use super::{validate_key, BlobStore, StorageError};

/// Blob store bounded by total stored bytes.
///
/// When the capacity is exceeded moka evicts blobs. Evicting a composite only
/// turns the next read of its index entry into a miss.
pub struct MemoryBlobStore {
    blobs: moka::future::Cache<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new(max_size_bytes: u64) -> Self {
        let blobs = moka::future::Cache::builder()
            .max_capacity(max_size_bytes)
            .weigher(|_key: &String, value: &Bytes| value.len().min(u32::MAX as usize) as u32)
            .build();
        Self { blobs }
    }

    /// Number of stored blobs (approximate until pending tasks run).
    pub fn len(&self) -> u64 {
        self.blobs.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush moka's pending maintenance so counts are exact.
    pub async fn run_pending_tasks(&self) {
        self.blobs.run_pending_tasks().await;
    }

    /// Whether a blob is currently stored under `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.get(key).await.is_some()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.blobs
            .get(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        self.blobs.insert(key.to_string(), data).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.invalidate(key).await;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
