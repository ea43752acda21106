// Logging module for structured logging using the tracing crate

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Filter used when neither `RUST_LOG` nor the config sets one
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, for log aggregation
    #[default]
    Json,
    /// Human-readable lines, for local development
    Pretty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `info,kagami=debug`); `RUST_LOG` wins when set
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Filter directive in effect: `RUST_LOG`, then `level`, then `info`.
    pub fn filter_directive(&self, rust_log: Option<&str>) -> String {
        rust_log
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.level.clone())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(level) = &self.level {
            EnvFilter::try_new(level)
                .map_err(|e| format!("logging.level '{}' is invalid: {}", level, e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to install subscriber: {0}")]
    InitError(String),
}

/// Install the global tracing subscriber.
///
/// Events go to stdout, formatted as JSON (default) or pretty text, filtered
/// by `RUST_LOG` or `config.level` (default `info`). Fails if a global
/// subscriber is already installed.
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = config.filter_directive(rust_log.as_deref());
    let filter =
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    let registry = Registry::default().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    result.map_err(|e| LoggingError::InitError(e.to_string()))
}
