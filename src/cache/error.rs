//! Cache error types

use crate::storage::StorageError;
use crate::watermark::WatermarkError;

/// Watermark cache errors.
///
/// `Clone` so a single generation's failure can be handed to every coalesced
/// waiter.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// Composition failed; nothing was stored or indexed
    Generation(WatermarkError),
    /// Blob store read or write failed
    Storage(StorageError),
    /// Index backend unreachable or returned an error
    IndexUnavailable(String),
    /// Index record could not be encoded or decoded
    SerializationError(String),
    /// The detached generation task panicked or was cancelled
    TaskFailed(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Generation(err) => write!(f, "Composite generation failed: {}", err),
            CacheError::Storage(err) => write!(f, "Composite storage failed: {}", err),
            CacheError::IndexUnavailable(msg) => write!(f, "Cache index unavailable: {}", msg),
            CacheError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::TaskFailed(msg) => write!(f, "Generation task failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Generation(err) => Some(err),
            CacheError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WatermarkError> for CacheError {
    fn from(err: WatermarkError) -> Self {
        CacheError::Generation(err)
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Storage(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CacheError::from(WatermarkError::EmptySource);
        assert_eq!(err.to_string(), "Composite generation failed: Source asset is empty");

        let err = CacheError::IndexUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Cache index unavailable: connection refused");
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error;
        let err = CacheError::from(StorageError::Unavailable("s3".to_string()));
        assert!(err.source().is_some());
        assert!(CacheError::TaskFailed("panic".to_string()).source().is_none());
    }
}
