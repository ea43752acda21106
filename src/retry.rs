//! Retry Logic with Exponential Backoff
//!
//! Original reads are retried on transient storage failures before the
//! gateway gives up with `503 storage_unavailable`.
//!
//! ## Retriable vs Non-Retriable Errors
//!
//! **Retriable** (see [`StorageError::is_transient`]):
//! - backend unavailable (network, throttling, 5xx)
//! - I/O errors
//!
//! **Non-Retriable** (fail immediately):
//! - blob not found: the catalog points at a missing object, retrying cannot help
//! - invalid key
//!
//! ## Exponential Backoff
//!
//! - Attempt 1: No delay (immediate)
//! - Attempt 2: `initial_backoff_ms`
//! - Attempt 3: 2x, then 4x, ... capped at `max_backoff_ms`
//!
//! ## Configuration Example
//!
//! ```yaml
//! storage:
//!   retry:
//!     max_attempts: 3
//!     initial_backoff_ms: 50
//!     max_backoff_ms: 1000
//! ```

use std::future::Future;
use std::time::Duration;

use crate::constants::{
    DEFAULT_RETRY_INITIAL_BACKOFF_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_BACKOFF_MS,
};
use crate::metrics::Metrics;
use crate::storage::StorageError;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (cap for exponential growth)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Backoff before the given attempt (0-indexed; 0 for the first attempt).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // initial_backoff * 2^(attempt-1)
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }

    /// Whether to retry after `error` on the given attempt (0-indexed).
    pub fn should_retry(&self, attempt: u32, error: &StorageError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        error.is_transient()
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 0u32;
        loop {
            let delay = self.backoff_duration(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(attempt, &err) => {
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient storage error, retrying"
                    );
                    Metrics::global().storage_retries.inc();
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
