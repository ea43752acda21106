//! Identity marker rasterization.
//!
//! Markers are drawn with a built-in 5x7 bitmap glyph set by default, which
//! keeps output byte-stable across platforms and needs no font file. A
//! TrueType font can be configured instead; it is rendered through `ab_glyph`.
//! Every marker gets a one-cell drop shadow so it stays legible on both light
//! and dark content.
//!
//! # Example
//!
//! ```ignore
//! use kagami::watermark::text_renderer::{render_marker, Color, MarkerFont, MarkerStyle};
//!
//! let style = MarkerStyle { color: Color::white(), opacity: 0.35, scale: 2 };
//! let layer = render_marker("ALICE:1A2B3C4D", &MarkerFont::Bitmap, &style).unwrap();
//! ```

use std::path::Path;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};

use super::WatermarkError;

/// Width of one bitmap glyph cell in font units (5 columns plus 1 gap).
pub const GLYPH_CELL_WIDTH: u32 = 6;
/// Height of one bitmap glyph cell in font units (7 rows plus 1 gap).
pub const GLYPH_CELL_HEIGHT: u32 = 8;

/// Parsed RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255)
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Font used to draw markers.
pub enum MarkerFont {
    /// Built-in 5x7 glyphs.
    Bitmap,
    /// TrueType/OpenType font loaded from disk.
    TrueType(FontVec),
}

impl std::fmt::Debug for MarkerFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitmap => write!(f, "MarkerFont::Bitmap"),
            Self::TrueType(_) => write!(f, "MarkerFont::TrueType"),
        }
    }
}

impl MarkerFont {
    /// Load the font at `path`, or the bitmap font when no path is configured.
    pub fn load(path: Option<&Path>) -> Result<Self, WatermarkError> {
        let Some(path) = path else {
            return Ok(Self::Bitmap);
        };

        let data = std::fs::read(path).map_err(|e| {
            WatermarkError::RenderError(format!("cannot read font {}: {}", path.display(), e))
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| {
            WatermarkError::RenderError(format!("invalid font {}: {}", path.display(), e))
        })?;
        Ok(Self::TrueType(font))
    }
}

/// Visual parameters for one marker layer.
#[derive(Debug, Clone, Copy)]
pub struct MarkerStyle {
    pub color: Color,
    /// Opacity (0.0 to 1.0).
    pub opacity: f32,
    /// Integer scale; one glyph cell is `6*scale x 8*scale` pixels.
    pub scale: u32,
}

/// Parse a hex color string (`#RGB` or `#RRGGBB`).
pub fn parse_hex_color(hex: &str) -> Result<Color, WatermarkError> {
    let hex = hex
        .strip_prefix('#')
        .ok_or_else(|| WatermarkError::ConfigError("Color must start with '#'".to_string()))?;

    let digit = |s: &str| {
        u8::from_str_radix(s, 16)
            .map_err(|_| WatermarkError::ConfigError(format!("Invalid hex digit in '{}'", s)))
    };

    match hex.len() {
        3 => Ok(Color::new(
            digit(&hex[0..1])? * 17,
            digit(&hex[1..2])? * 17,
            digit(&hex[2..3])? * 17,
        )),
        6 => Ok(Color::new(
            digit(&hex[0..2])?,
            digit(&hex[2..4])?,
            digit(&hex[4..6])?,
        )),
        _ => Err(WatermarkError::ConfigError(format!(
            "Color must be #RGB or #RRGGBB format, got {} characters",
            hex.len()
        ))),
    }
}

/// Pick the marker scale for an image so the marker stays readable but small.
pub fn scale_for_image(width: u32, height: u32) -> u32 {
    (width.min(height) / 160).clamp(1, 16)
}

/// Render `text` to a transparent RGBA layer.
pub fn render_marker(
    text: &str,
    font: &MarkerFont,
    style: &MarkerStyle,
) -> Result<RgbaImage, WatermarkError> {
    if text.is_empty() {
        return Err(WatermarkError::RenderError(
            "Cannot render empty marker".to_string(),
        ));
    }

    match font {
        MarkerFont::Bitmap => Ok(render_bitmap(text, style)),
        MarkerFont::TrueType(font) => render_truetype(text, font, style),
    }
}

fn render_bitmap(text: &str, style: &MarkerStyle) -> RgbaImage {
    let scale = style.scale.max(1);
    let chars = text.chars().count() as u32;
    // One extra scaled pixel on each axis for the shadow.
    let width = chars * GLYPH_CELL_WIDTH * scale + scale;
    let height = GLYPH_CELL_HEIGHT * scale + scale;
    let mut layer = RgbaImage::new(width, height);

    let alpha = opacity_to_alpha(style.opacity);
    let shadow = Rgba([0, 0, 0, alpha]);
    let ink = Rgba([style.color.r, style.color.g, style.color.b, alpha]);

    for (offset, paint) in [(scale, shadow), (0, ink)] {
        for (index, c) in text.chars().enumerate() {
            let origin_x = index as u32 * GLYPH_CELL_WIDTH * scale + offset;
            let rows = glyph_rows(c);
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..5u32 {
                    if bits & (0b10000 >> col) == 0 {
                        continue;
                    }
                    let x0 = origin_x + col * scale;
                    let y0 = row as u32 * scale + offset;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            layer.put_pixel(x0 + dx, y0 + dy, paint);
                        }
                    }
                }
            }
        }
    }

    layer
}

fn render_truetype(
    text: &str,
    font: &FontVec,
    style: &MarkerStyle,
) -> Result<RgbaImage, WatermarkError> {
    let px = (GLYPH_CELL_HEIGHT * style.scale.max(1)) as f32;
    let scale = PxScale::from(px);
    let scaled = font.as_scaled(scale);

    let mut advance = 0.0f32;
    let mut prev: Option<ab_glyph::GlyphId> = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            advance += scaled.kern(p, id);
        }
        advance += scaled.h_advance(id);
        prev = Some(id);
    }

    let shadow_offset = style.scale.max(1);
    let width = advance.ceil() as u32 + shadow_offset + 2;
    let height = scaled.height().ceil() as u32 + shadow_offset + 2;
    if width <= shadow_offset + 2 {
        return Err(WatermarkError::RenderError(
            "Font produced an empty marker".to_string(),
        ));
    }

    let mut layer = RgbaImage::new(width, height);
    let alpha = opacity_to_alpha(style.opacity);
    let passes = [
        (shadow_offset as f32, Color::black()),
        (0.0, style.color),
    ];

    for (offset, color) in passes {
        let mut cursor = 1.0 + offset;
        let baseline = 1.0 + offset + scaled.ascent();
        let mut prev: Option<ab_glyph::GlyphId> = None;

        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(p) = prev {
                cursor += scaled.kern(p, id);
            }
            let glyph = id.with_scale_and_position(scale, ab_glyph::point(cursor, baseline));
            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    let x = gx as i32 + bounds.min.x as i32;
                    let y = gy as i32 + bounds.min.y as i32;
                    if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                        let top = Rgba([color.r, color.g, color.b, (coverage * alpha as f32) as u8]);
                        let existing = *layer.get_pixel(x as u32, y as u32);
                        layer.put_pixel(x as u32, y as u32, blend_pixels(existing, top));
                    }
                });
            }
            cursor += scaled.h_advance(id);
            prev = Some(id);
        }
    }

    Ok(layer)
}

fn opacity_to_alpha(opacity: f32) -> u8 {
    (opacity.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Blend two RGBA pixels using source-over alpha compositing.
pub(crate) fn blend_pixels(bottom: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
    let top_alpha = top[3] as f32 / 255.0;
    let bottom_alpha = bottom[3] as f32 / 255.0;

    let out_alpha = top_alpha + bottom_alpha * (1.0 - top_alpha);

    if out_alpha < 0.001 {
        return Rgba([0, 0, 0, 0]);
    }

    let blend = |t: u8, b: u8| -> u8 {
        let t = t as f32 / 255.0;
        let b = b as f32 / 255.0;
        let result = (t * top_alpha + b * bottom_alpha * (1.0 - top_alpha)) / out_alpha;
        (result * 255.0).round() as u8
    };

    Rgba([
        blend(top[0], bottom[0]),
        blend(top[1], bottom[1]),
        blend(top[2], bottom[2]),
        (out_alpha * 255.0).round() as u8,
    ])
}

/// Row bitmaps (5 bits, MSB = leftmost column) for the built-in glyph set.
fn glyph_rows(c: char) -> [u8; 7] {
    match c {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '@' => [0b01110, 0b10001, 0b10111, 0b10101, 0b10111, 0b10000, 0b01110],
        ' ' => [0; 7],
        _ => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::marker::MARKER_ALPHABET;

    fn style(scale: u32) -> MarkerStyle {
        MarkerStyle {
            color: Color::white(),
            opacity: 1.0,
            scale,
        }
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#FFF").unwrap(), Color::white());
        assert_eq!(parse_hex_color("#ff0000").unwrap(), Color::new(255, 0, 0));
        assert!(parse_hex_color("FFFFFF").is_err());
        assert!(parse_hex_color("#GGGGGG").is_err());
        assert!(parse_hex_color("#FFFF").is_err());
    }

    #[test]
    fn test_scale_for_image() {
        assert_eq!(scale_for_image(100, 100), 1);
        assert_eq!(scale_for_image(800, 600), 3);
        assert_eq!(scale_for_image(100_000, 100_000), 16);
    }

    #[test]
    fn test_bitmap_dimensions() {
        let layer = render_marker("AB", &MarkerFont::Bitmap, &style(2)).unwrap();
        assert_eq!(layer.width(), 2 * GLYPH_CELL_WIDTH * 2 + 2);
        assert_eq!(layer.height(), GLYPH_CELL_HEIGHT * 2 + 2);
    }

    #[test]
    fn test_bitmap_draws_ink_and_shadow() {
        let layer = render_marker("T", &MarkerFont::Bitmap, &style(1)).unwrap();
        // Top bar of 'T' at (0,0) is ink, its shadow lands at (1,1).
        assert_eq!(*layer.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(layer.get_pixel(5, 1)[3], 255);
        assert_eq!(layer.get_pixel(5, 1)[0], 0);
    }

    #[test]
    fn test_bitmap_is_deterministic() {
        let a = render_marker("ALICE:00FF", &MarkerFont::Bitmap, &style(3)).unwrap();
        let b = render_marker("ALICE:00FF", &MarkerFont::Bitmap, &style(3)).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_every_marker_glyph_has_ink() {
        for c in MARKER_ALPHABET.chars() {
            assert!(glyph_rows(c).iter().any(|row| *row != 0), "glyph {}", c);
        }
    }

    #[test]
    fn test_empty_marker_is_rejected() {
        let result = render_marker("", &MarkerFont::Bitmap, &style(1));
        assert!(matches!(result, Err(WatermarkError::RenderError(_))));
    }

    #[test]
    fn test_missing_font_file_is_error() {
        let result = MarkerFont::load(Some(Path::new("/nonexistent/font.ttf")));
        assert!(matches!(result, Err(WatermarkError::RenderError(_))));
    }

    #[test]
    fn test_invalid_font_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, b"not a font").unwrap();
        let result = MarkerFont::load(Some(&path));
        assert!(matches!(result, Err(WatermarkError::RenderError(_))));
    }

    #[test]
    fn test_no_font_path_uses_bitmap() {
        assert!(matches!(MarkerFont::load(None).unwrap(), MarkerFont::Bitmap));
    }

    #[test]
    fn test_blend_opaque_top_wins() {
        let out = blend_pixels(Rgba([0, 0, 0, 255]), Rgba([255, 255, 255, 255]));
        assert_eq!(out, Rgba([255, 255, 255, 255]));
    }
}
