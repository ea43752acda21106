//! Watermark engine configuration.
//!
//! ```yaml
//! watermark:
//!   secret: "${KAGAMI_MARK_SECRET}"
//!   output_format: jpeg
//!   quality: 85
//!   opacity: 0.35
//!   color: "#FFFFFF"
//!   font_path: null
//!   max_pixels: 50000000
//!   overlay:
//!     source: "s3://assets/logo.png"
//!     opacity: 0.5
//!     margin: 16
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::encoder::OutputFormat;
use crate::constants::{
    DEFAULT_JPEG_QUALITY, DEFAULT_MARKER_OPACITY, DEFAULT_MAX_PIXELS, DEFAULT_OVERLAY_OPACITY,
};

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_opacity() -> f32 {
    DEFAULT_MARKER_OPACITY
}

fn default_overlay_opacity() -> f32 {
    DEFAULT_OVERLAY_OPACITY
}

fn default_color() -> String {
    "#FFFFFF".to_string()
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

fn default_margin() -> u32 {
    16
}

fn default_overlay_cache_ttl() -> u64 {
    3600
}

/// Configuration of the watermark engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Key for the marker digest and the placement seed.
    pub secret: String,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// JPEG quality 1-100 (ignored for PNG).
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Marker opacity from 0.0 to 1.0.
    #[serde(default = "default_opacity")]
    pub opacity: f32,

    /// Marker color as `#RGB` or `#RRGGBB`.
    #[serde(default = "default_color")]
    pub color: String,

    /// TrueType font for the marker; the built-in bitmap font when unset.
    #[serde(default)]
    pub font_path: Option<PathBuf>,

    #[serde(default)]
    pub overlay: Option<OverlayConfig>,

    /// Sources above this many pixels are rejected before decoding.
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
}

/// Optional corner overlay (e.g. collection logo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// File path, `s3://bucket/key` or `https://` URL.
    pub source: String,

    #[serde(default = "default_overlay_opacity")]
    pub opacity: f32,

    /// Distance from the image edges in pixels.
    #[serde(default = "default_margin")]
    pub margin: u32,

    /// How long the decoded overlay stays cached.
    #[serde(default = "default_overlay_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl WatermarkConfig {
    /// Configuration with defaults and the given secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            output_format: OutputFormat::default(),
            quality: default_quality(),
            opacity: default_opacity(),
            color: default_color(),
            font_path: None,
            overlay: None,
            max_pixels: default_max_pixels(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("watermark.secret cannot be empty".to_string());
        }

        if self.quality == 0 || self.quality > 100 {
            return Err(format!(
                "watermark.quality must be between 1 and 100, got {}",
                self.quality
            ));
        }

        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) || self.opacity == 0.0
        {
            return Err(format!(
                "watermark.opacity must be a finite value in (0.0, 1.0], got {}",
                self.opacity
            ));
        }

        if let Some(hex_part) = self.color.strip_prefix('#') {
            let len = hex_part.len();
            if (len != 3 && len != 6) || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!(
                    "watermark.color must be in #RGB or #RRGGBB format, got '{}'",
                    self.color
                ));
            }
        } else {
            return Err(format!(
                "watermark.color must be a hex string starting with '#', got '{}'",
                self.color
            ));
        }

        if self.max_pixels == 0 {
            return Err("watermark.max_pixels must be greater than 0".to_string());
        }

        if let Some(overlay) = &self.overlay {
            overlay.validate()?;
        }

        Ok(())
    }
}

impl OverlayConfig {
    /// Note: http:// is excluded to prevent MITM substitution of the overlay.
    const ALLOWED_PREFIXES: &'static [&'static str] = &["s3://", "https://", "file://", "/", "./"];

    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("watermark.overlay.source cannot be empty".to_string());
        }

        if !Self::ALLOWED_PREFIXES
            .iter()
            .any(|p| self.source.starts_with(p))
        {
            return Err(format!(
                "watermark.overlay.source must be a path, s3:// or https:// source, got '{}'",
                self.source
            ));
        }

        if !self.opacity.is_finite() || !(0.0..=1.0).contains(&self.opacity) {
            return Err(format!(
                "watermark.overlay.opacity must be a finite value between 0.0 and 1.0, got {}",
                self.opacity
            ));
        }

        Ok(())
    }
}
