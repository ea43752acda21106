//! Watermark error types.
//!
//! Every variant is terminal for the request: the engine never hands back the
//! source bytes when one of these is produced.

use std::fmt;

/// Errors that can occur while compositing an identity marker.
#[derive(Debug, Clone)]
pub enum WatermarkError {
    /// The source asset contained no bytes
    EmptySource,

    /// The source asset could not be read from storage
    SourceUnavailable(String),

    /// The source bytes are not in a format the engine accepts
    UnsupportedFormat(String),

    /// The source image could not be decoded
    DecodeError(String),

    /// The source image exceeds the configured pixel budget
    ImageTooLarge { pixels: u64, max_pixels: u64 },

    /// The marker could not be rendered (font missing or invalid)
    RenderError(String),

    /// The configured overlay image could not be loaded
    OverlayError(String),

    /// Re-encoding the composite failed
    EncodeError(String),

    /// Invalid engine configuration
    ConfigError(String),

    /// The blocking composition task panicked or was cancelled
    TaskFailed(String),
}

impl fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySource => write!(f, "Source asset is empty"),
            Self::SourceUnavailable(msg) => write!(f, "Source asset unavailable: {}", msg),
            Self::UnsupportedFormat(fmt_name) => {
                write!(f, "Unsupported source format: {}", fmt_name)
            }
            Self::DecodeError(msg) => write!(f, "Failed to decode source image: {}", msg),
            Self::ImageTooLarge { pixels, max_pixels } => write!(
                f,
                "Source image has {} pixels, limit is {}",
                pixels, max_pixels
            ),
            Self::RenderError(msg) => write!(f, "Failed to render identity marker: {}", msg),
            Self::OverlayError(msg) => write!(f, "Failed to load overlay: {}", msg),
            Self::EncodeError(msg) => write!(f, "Failed to encode composite: {}", msg),
            Self::ConfigError(msg) => write!(f, "Watermark configuration error: {}", msg),
            Self::TaskFailed(msg) => write!(f, "Composition task failed: {}", msg),
        }
    }
}

impl std::error::Error for WatermarkError {}
