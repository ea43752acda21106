//! Alpha blending of marker and overlay layers onto the decoded source.
//!
//! A tiled marker produces dozens of placements of the same bitmap, so layers
//! share their pixels through an `Arc` instead of cloning them per position.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use super::position::PlacementPosition;

/// One placement of a layer image on the target.
#[derive(Clone)]
pub struct WatermarkLayer {
    /// Layer pixels (RGBA).
    pub image: Arc<RgbaImage>,
    /// Top-left placement; may be partially outside the target.
    pub position: PlacementPosition,
    /// Opacity multiplied into the layer's own alpha (0.0 to 1.0).
    pub opacity: f32,
}

impl std::fmt::Debug for WatermarkLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkLayer")
            .field("dimensions", &(self.image.width(), self.image.height()))
            .field("position", &self.position)
            .field("opacity", &self.opacity)
            .finish()
    }
}

/// Ordered stack of layers applied to a target image.
#[derive(Debug, Default)]
pub struct Compositor {
    layers: Vec<WatermarkLayer>,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&mut self, layer: WatermarkLayer) {
        self.layers.push(layer);
    }

    /// Add the same image at every position.
    pub fn add_tiled(&mut self, image: Arc<RgbaImage>, positions: &[PlacementPosition], opacity: f32) {
        for position in positions {
            self.layers.push(WatermarkLayer {
                image: Arc::clone(&image),
                position: *position,
                opacity,
            });
        }
    }

    /// Apply all layers in insertion order.
    pub fn apply(&self, target: &mut RgbaImage) {
        for layer in &self.layers {
            blend_layer(target, layer);
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

fn blend_layer(target: &mut RgbaImage, layer: &WatermarkLayer) {
    let target_width = target.width() as i32;
    let target_height = target.height() as i32;

    let x_start = layer.position.x.max(0);
    let y_start = layer.position.y.max(0);
    let x_end = (layer.position.x + layer.image.width() as i32).min(target_width);
    let y_end = (layer.position.y + layer.image.height() as i32).min(target_height);

    for ty in y_start..y_end {
        for tx in x_start..x_end {
            let wx = (tx - layer.position.x) as u32;
            let wy = (ty - layer.position.y) as u32;

            let fg = *layer.image.get_pixel(wx, wy);
            if fg[3] == 0 {
                continue;
            }
            let bg = *target.get_pixel(tx as u32, ty as u32);
            target.put_pixel(tx as u32, ty as u32, blend_over(bg, fg, layer.opacity));
        }
    }
}

/// Porter-Duff "over" with an extra opacity factor on the foreground.
fn blend_over(background: Rgba<u8>, foreground: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let fg_alpha = (foreground[3] as f32 / 255.0) * opacity.clamp(0.0, 1.0);
    let bg_alpha = background[3] as f32 / 255.0;

    let out_alpha = fg_alpha + bg_alpha * (1.0 - fg_alpha);
    if out_alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |f: u8, b: u8| -> u8 {
        let f = f as f32 / 255.0;
        let b = b as f32 / 255.0;
        let c = (f * fg_alpha + b * bg_alpha * (1.0 - fg_alpha)) / out_alpha;
        (c * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(foreground[0], background[0]),
        channel(foreground[1], background[1]),
        channel(foreground[2], background[2]),
        (out_alpha * 255.0).round() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(px))
    }

    #[test]
    fn test_full_opacity_replaces_pixels() {
        let mut target = solid(10, 10, [0, 0, 0, 255]);
        let mut compositor = Compositor::new();
        compositor.add_layer(WatermarkLayer {
            image: Arc::new(solid(2, 2, [255, 255, 255, 255])),
            position: PlacementPosition::new(4, 4),
            opacity: 1.0,
        });
        compositor.apply(&mut target);

        assert_eq!(*target.get_pixel(4, 4), Rgba([255, 255, 255, 255]));
        assert_eq!(*target.get_pixel(5, 5), Rgba([255, 255, 255, 255]));
        assert_eq!(*target.get_pixel(6, 6), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_half_opacity_blends() {
        let mut target = solid(1, 1, [0, 0, 0, 255]);
        let mut compositor = Compositor::new();
        compositor.add_layer(WatermarkLayer {
            image: Arc::new(solid(1, 1, [255, 255, 255, 255])),
            position: PlacementPosition::new(0, 0),
            opacity: 0.5,
        });
        compositor.apply(&mut target);

        let px = target.get_pixel(0, 0);
        assert!(px[0] >= 127 && px[0] <= 128);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_layer_outside_target_is_clipped() {
        let mut target = solid(4, 4, [10, 10, 10, 255]);
        let mut compositor = Compositor::new();
        compositor.add_layer(WatermarkLayer {
            image: Arc::new(solid(4, 4, [200, 0, 0, 255])),
            position: PlacementPosition::new(-2, -2),
            opacity: 1.0,
        });
        compositor.add_layer(WatermarkLayer {
            image: Arc::new(solid(4, 4, [200, 0, 0, 255])),
            position: PlacementPosition::new(10, 10),
            opacity: 1.0,
        });
        compositor.apply(&mut target);

        assert_eq!(target.get_pixel(0, 0)[0], 200);
        assert_eq!(target.get_pixel(1, 1)[0], 200);
        assert_eq!(target.get_pixel(2, 2)[0], 10);
    }

    #[test]
    fn test_transparent_pixels_leave_target_untouched() {
        let mut target = solid(2, 2, [50, 60, 70, 255]);
        let mut compositor = Compositor::new();
        compositor.add_layer(WatermarkLayer {
            image: Arc::new(solid(2, 2, [255, 255, 255, 0])),
            position: PlacementPosition::new(0, 0),
            opacity: 1.0,
        });
        compositor.apply(&mut target);
        assert_eq!(*target.get_pixel(1, 1), Rgba([50, 60, 70, 255]));
    }

    #[test]
    fn test_add_tiled_shares_image() {
        let image = Arc::new(solid(1, 1, [1, 2, 3, 255]));
        let positions = [
            PlacementPosition::new(0, 0),
            PlacementPosition::new(1, 0),
            PlacementPosition::new(0, 1),
        ];
        let mut compositor = Compositor::new();
        compositor.add_tiled(Arc::clone(&image), &positions, 1.0);
        assert_eq!(compositor.layer_count(), 3);
        assert_eq!(Arc::strong_count(&image), 4);
    }
}
