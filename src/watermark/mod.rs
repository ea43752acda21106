//! Per-identity watermark composition.
//!
//! [`WatermarkEngine::composite`] decodes an original, tiles the identity
//! marker across it from a seeded origin, optionally stamps the overlay in a
//! seeded corner, and re-encodes the result in the configured format.
//!
//! # Guarantees
//!
//! - The same (source bytes, asset id, identity id) always produces
//!   byte-identical output. Nothing depends on wall-clock time.
//! - Different identities get different marker text and different placement.
//! - Any failure is an error. The engine never returns the unmarked source.
//!
//! # Configuration Example
//!
//! ```yaml
//! watermark:
//!   secret: "${KAGAMI_MARK_SECRET}"
//!   output_format: jpeg
//!   quality: 85
//!   opacity: 0.35
//!   overlay:
//!     source: "s3://assets/logo.png"
//! ```

pub mod compositor;
pub mod config;
pub mod encoder;
pub mod error;
pub mod marker;
pub mod overlay;
pub mod position;
pub mod text_renderer;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use image::{ImageFormat, RgbaImage};

pub use compositor::{Compositor, WatermarkLayer};
pub use config::{OverlayConfig, WatermarkConfig};
pub use encoder::OutputFormat;
pub use error::WatermarkError;
pub use marker::{IdentityMarker, PlacementSeed};
pub use overlay::{OverlayLoader, OverlaySource};
pub use position::{Corner, ImageDimensions, MarkDimensions, PlacementPosition};
pub use text_renderer::{Color, MarkerFont, MarkerStyle};

use crate::constants::DEFAULT_OVERLAY_OPACITY;

const DEFAULT_OVERLAY_MARGIN: u32 = 16;

/// Formats accepted as composition sources.
const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
];

/// Immutable rendering parameters shared with blocking composition tasks.
struct RenderSettings {
    secret: Vec<u8>,
    output_format: OutputFormat,
    quality: u8,
    opacity: f32,
    color: Color,
    font: MarkerFont,
    max_pixels: u64,
    overlay_opacity: f32,
    overlay_margin: u32,
}

/// Composites identity markers onto originals.
#[derive(Clone)]
pub struct WatermarkEngine {
    settings: Arc<RenderSettings>,
    overlay_source: Option<String>,
    overlay_loader: Option<OverlayLoader>,
}

impl WatermarkEngine {
    /// Build an engine from validated configuration.
    ///
    /// The font is loaded eagerly; the overlay is loaded on first use and
    /// cached. `s3_client` is required only for `s3://` overlays.
    pub fn new(config: &WatermarkConfig, s3_client: Option<S3Client>) -> Result<Self, WatermarkError> {
        config.validate().map_err(WatermarkError::ConfigError)?;

        let font = MarkerFont::load(config.font_path.as_deref())?;
        let color = text_renderer::parse_hex_color(&config.color)?;

        let (overlay_source, overlay_loader, overlay_opacity, overlay_margin) =
            match &config.overlay {
                Some(overlay) => (
                    Some(overlay.source.clone()),
                    Some(OverlayLoader::new(
                        Duration::from_secs(overlay.cache_ttl_secs),
                        s3_client,
                    )?),
                    overlay.opacity,
                    overlay.margin,
                ),
                None => (None, None, DEFAULT_OVERLAY_OPACITY, DEFAULT_OVERLAY_MARGIN),
            };

        Ok(Self {
            settings: Arc::new(RenderSettings {
                secret: config.secret.as_bytes().to_vec(),
                output_format: config.output_format,
                quality: config.quality,
                opacity: config.opacity,
                color,
                font,
                max_pixels: config.max_pixels,
                overlay_opacity,
                overlay_margin,
            }),
            overlay_source,
            overlay_loader,
        })
    }

    /// Marker text and digest that `identity_id` receives.
    pub fn marker_for(&self, identity_id: &str) -> IdentityMarker {
        IdentityMarker::derive(identity_id, &self.settings.secret)
    }

    pub fn output_format(&self) -> OutputFormat {
        self.settings.output_format
    }

    /// Composite the marker for `identity_id` onto `source`.
    ///
    /// Runs the CPU-bound work on the blocking pool.
    pub async fn composite(
        &self,
        source: Bytes,
        asset_id: &str,
        identity_id: &str,
    ) -> Result<Bytes, WatermarkError> {
        if source.is_empty() {
            return Err(WatermarkError::EmptySource);
        }

        let overlay = self.load_overlay().await?;
        let settings = Arc::clone(&self.settings);
        let asset_id = asset_id.to_string();
        let identity_id = identity_id.to_string();

        let encoded = tokio::task::spawn_blocking(move || {
            composite_blocking(&settings, &source, &asset_id, &identity_id, overlay.as_deref())
        })
        .await
        .map_err(|e| WatermarkError::TaskFailed(e.to_string()))??;

        Ok(Bytes::from(encoded))
    }

    /// Synchronous composition for callers already off the async runtime.
    pub fn composite_sync(
        &self,
        source: &[u8],
        asset_id: &str,
        identity_id: &str,
        overlay: Option<&RgbaImage>,
    ) -> Result<Vec<u8>, WatermarkError> {
        composite_blocking(&self.settings, source, asset_id, identity_id, overlay)
    }

    async fn load_overlay(&self) -> Result<Option<Arc<RgbaImage>>, WatermarkError> {
        match (&self.overlay_source, &self.overlay_loader) {
            (Some(source), Some(loader)) => loader.load(source).await.map(Some),
            _ => Ok(None),
        }
    }
}

fn composite_blocking(
    settings: &RenderSettings,
    source: &[u8],
    asset_id: &str,
    identity_id: &str,
    overlay: Option<&RgbaImage>,
) -> Result<Vec<u8>, WatermarkError> {
    if source.is_empty() {
        return Err(WatermarkError::EmptySource);
    }

    let format = image::guess_format(source)
        .map_err(|_| WatermarkError::UnsupportedFormat("unrecognized".to_string()))?;
    if !ACCEPTED_FORMATS.contains(&format) {
        return Err(WatermarkError::UnsupportedFormat(format!("{:?}", format)));
    }

    // Check the header dimensions before allocating the full frame.
    let (width, height) = image::io::Reader::with_format(Cursor::new(source), format)
        .into_dimensions()
        .map_err(|e| WatermarkError::DecodeError(e.to_string()))?;
    let pixels = width as u64 * height as u64;
    if pixels > settings.max_pixels {
        return Err(WatermarkError::ImageTooLarge {
            pixels,
            max_pixels: settings.max_pixels,
        });
    }
    if pixels == 0 {
        return Err(WatermarkError::DecodeError("image has no pixels".to_string()));
    }

    let mut canvas = image::load_from_memory_with_format(source, format)
        .map_err(|e| WatermarkError::DecodeError(e.to_string()))?
        .to_rgba8();

    let marker = IdentityMarker::derive(identity_id, &settings.secret);
    let seed = PlacementSeed::derive(asset_id, identity_id, &settings.secret);

    let style = MarkerStyle {
        color: settings.color,
        opacity: settings.opacity,
        scale: text_renderer::scale_for_image(width, height),
    };
    let mark = Arc::new(text_renderer::render_marker(
        &marker.text,
        &settings.font,
        &style,
    )?);

    let image_dims = ImageDimensions { width, height };
    let mark_dims = MarkDimensions {
        width: mark.width(),
        height: mark.height(),
    };
    let positions = position::tiled_positions(&image_dims, &mark_dims, &seed);

    let mut compositor = Compositor::new();
    compositor.add_tiled(mark, &positions, 1.0);

    if let Some(overlay) = overlay {
        let overlay_dims = MarkDimensions {
            width: overlay.width(),
            height: overlay.height(),
        };
        let corner = Corner::from_seed(&seed);
        compositor.add_layer(WatermarkLayer {
            image: Arc::new(overlay.clone()),
            position: position::corner_position(
                corner,
                &image_dims,
                &overlay_dims,
                settings.overlay_margin,
            ),
            opacity: settings.overlay_opacity,
        });
    }

    compositor.apply(&mut canvas);

    encoder::encode(&canvas, settings.output_format, settings.quality)
}
