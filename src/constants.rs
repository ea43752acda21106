// Constants module - centralized default values for configuration
//
// This module defines all default values used throughout the codebase.
// Using constants instead of magic numbers keeps the config defaults,
// the components and the tests in agreement.

// =============================================================================
// Server defaults
// =============================================================================

/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 4;

/// Size of each chunk written to the client when streaming a response body
pub const RESPONSE_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Watermark defaults
// =============================================================================

/// Default JPEG quality for re-encoded composites
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Default marker opacity (0.0 - 1.0)
pub const DEFAULT_MARKER_OPACITY: f32 = 0.35;

/// Default overlay opacity (0.0 - 1.0)
pub const DEFAULT_OVERLAY_OPACITY: f32 = 0.5;

/// Default upper bound on decoded source pixels (image bomb protection)
pub const DEFAULT_MAX_PIXELS: u64 = 50_000_000;

/// Maximum number of identity characters rendered into the visible marker
pub const MAX_MARKER_ID_CHARS: usize = 24;

/// Number of hex digits of the identity digest appended to the marker
pub const MARKER_DIGEST_HEX_LEN: usize = 8;

// =============================================================================
// Watermark cache defaults
// =============================================================================

/// Default composite TTL (24 hours)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Default sweep interval
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default grace period before an expired composite's bytes are deleted
pub const DEFAULT_SWEEP_GRACE_SECS: u64 = 300;

/// Default number of expired entries handled per sweep pass
pub const DEFAULT_SWEEP_BATCH: usize = 500;

/// Default in-memory blob store capacity in megabytes
pub const DEFAULT_BLOB_CACHE_SIZE_MB: u64 = 512;

/// Number of shards of the in-memory cache index
pub const CACHE_INDEX_SHARDS: usize = 16;

// =============================================================================
// Rate limiting defaults
// =============================================================================

/// Default idle TTL before an in-memory rate-limit bucket is evicted (5 minutes)
pub const DEFAULT_BUCKET_IDLE_TTL_SECS: u64 = 5 * 60;

/// Default rate-limit bucket cleanup interval (1 minute)
pub const DEFAULT_BUCKET_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Maximum number of tracked in-memory buckets before emergency cleanup
pub const DEFAULT_MAX_TRACKED_BUCKETS: usize = 200_000;

// =============================================================================
// Detector / access log defaults
// =============================================================================

/// Default rolling window for the distinct-asset heuristic
pub const DEFAULT_DISTINCT_WINDOW_SECS: u64 = 60;

/// Default distinct-asset threshold inside the rolling window
pub const DEFAULT_DISTINCT_ASSET_THRESHOLD: usize = 50;

/// Default sustained download velocity (downloads per minute)
pub const DEFAULT_DOWNLOADS_PER_MINUTE: usize = 30;

/// Default number of minutes the velocity must be sustained
pub const DEFAULT_VELOCITY_MINUTES: u32 = 5;

/// Default sequential-id run length that counts as enumeration
pub const DEFAULT_ENUMERATION_RUN: usize = 20;

/// Default access event retention (7 days)
pub const DEFAULT_EVENT_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Default duration an identity stays on the in-process block list
pub const DEFAULT_BLOCK_TTL_SECS: u64 = 60 * 60;

/// Default access-log channel capacity
pub const DEFAULT_ACCESS_LOG_CAPACITY: usize = 10_000;

/// Default access-log pruning interval
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Retry defaults
// =============================================================================

/// Default attempts for original reads (including the first)
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default initial backoff in milliseconds
pub const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 50;

/// Default backoff cap in milliseconds
pub const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 1000;

// =============================================================================
// Redis defaults
// =============================================================================

/// Default Redis key prefix
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "kagami";
