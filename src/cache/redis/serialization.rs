// Cache index record serialization using MessagePack

use crate::cache::{CacheError, WatermarkCacheEntry};
use serde::{Deserialize, Serialize};

/// Serialization format version for schema evolution
const SERIALIZATION_VERSION: u8 = 1;

/// Serializable wrapper for WatermarkCacheEntry with version marker
#[derive(Debug, Serialize, Deserialize)]
struct SerializableEntry {
    /// Schema version for forward/backward compatibility
    version: u8,
    entry: WatermarkCacheEntry,
}

/// Serializes an index record to MessagePack with a version marker
pub fn serialize_entry(entry: &WatermarkCacheEntry) -> Result<Vec<u8>, CacheError> {
    let serializable = SerializableEntry {
        version: SERIALIZATION_VERSION,
        entry: entry.clone(),
    };

    rmp_serde::to_vec(&serializable)
        .map_err(|e| CacheError::SerializationError(format!("MessagePack encoding failed: {}", e)))
}

/// Deserializes an index record
///
/// # Errors
/// Returns CacheError::SerializationError if:
/// - Data is corrupt or truncated
/// - Version is unsupported
/// - The storage key is empty
pub fn deserialize_entry(bytes: &[u8]) -> Result<WatermarkCacheEntry, CacheError> {
    let serializable: SerializableEntry = rmp_serde::from_slice(bytes).map_err(|e| {
        CacheError::SerializationError(format!("MessagePack decoding failed: {}", e))
    })?;

    if serializable.version != SERIALIZATION_VERSION {
        return Err(CacheError::SerializationError(format!(
            "Unsupported schema version: {} (expected: {})",
            serializable.version, SERIALIZATION_VERSION
        )));
    }

    if serializable.entry.composited_storage_key.is_empty() {
        return Err(CacheError::SerializationError(
            "Invalid entry: composited_storage_key is empty".to_string(),
        ));
    }

    Ok(serializable.entry)
}

/// Expiry-set member: JSON of the record. Stable for a given record, so the
/// same string can be rebuilt to remove it.
pub fn expiry_member(entry: &WatermarkCacheEntry) -> Result<String, CacheError> {
    Ok(serde_json::to_string(entry)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use std::time::Duration;

    fn create_test_entry() -> WatermarkCacheEntry {
        WatermarkCacheEntry::new(
            &CacheKey::new("a1", "alice"),
            "composites/a1/abc/1.jpg".to_string(),
            "image/jpeg",
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_serialize_then_deserialize() {
        let entry = create_test_entry();
        let bytes = serialize_entry(&entry).unwrap();
        assert_eq!(deserialize_entry(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_rejects_corrupt_data() {
        let result = deserialize_entry(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(CacheError::SerializationError(_))));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let bytes = rmp_serde::to_vec(&SerializableEntry {
            version: 99,
            entry: create_test_entry(),
        })
        .unwrap();
        let err = deserialize_entry(&bytes).unwrap_err();
        assert!(err.to_string().contains("Unsupported schema version: 99"));
    }

    #[test]
    fn test_expiry_member_is_stable() {
        let entry = create_test_entry();
        let member = expiry_member(&entry).unwrap();
        let parsed: WatermarkCacheEntry = serde_json::from_str(&member).unwrap();
        assert_eq!(expiry_member(&parsed).unwrap(), member);
    }
}
