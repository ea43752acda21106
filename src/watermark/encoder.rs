//! Output encoding for composites.
//!
//! The output format and quality come from configuration, never from the
//! source, so every composite carries the same encoder fingerprint. Encoding
//! from raw pixels also means no source metadata (EXIF, ICC, XMP) survives.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder as _, RgbaImage};
use serde::{Deserialize, Serialize};

use super::WatermarkError;

/// Encoded output format of composites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Encode RGBA pixels in the given format.
///
/// JPEG output drops the alpha channel; `quality` is ignored for PNG.
pub fn encode(
    image: &RgbaImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, WatermarkError> {
    let (width, height) = image.dimensions();
    let mut output = Cursor::new(Vec::new());

    match format {
        OutputFormat::Jpeg => {
            let rgb = rgba_to_rgb(image.as_raw());
            JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100))
                .write_image(&rgb, width, height, ColorType::Rgb8)
                .map_err(|e| WatermarkError::EncodeError(format!("jpeg: {}", e)))?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut output)
                .write_image(image.as_raw(), width, height, ColorType::Rgba8)
                .map_err(|e| WatermarkError::EncodeError(format!("png: {}", e)))?;
        }
    }

    Ok(output.into_inner())
}

fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for chunk in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&chunk[..3]);
    }
    rgb
}
