//! Seeded placement of identity markers and overlays.
//!
//! Markers are tiled across the whole image so a crop still carries at least
//! one complete copy. The tile origin, the spacing jitter and the overlay corner
//! all come from the [`PlacementSeed`] for the (asset, identity) pair, so two
//! identities receive visibly different layouts while any single pair always
//! lays out identically.
//!
//! # Example
//!
//! ```ignore
//! use kagami::watermark::marker::PlacementSeed;
//! use kagami::watermark::position::{tiled_positions, ImageDimensions, MarkDimensions};
//!
//! let seed = PlacementSeed::derive("asset-1", "alice", b"secret");
//! let image = ImageDimensions { width: 800, height: 600 };
//! let mark = MarkDimensions { width: 120, height: 16 };
//! let positions = tiled_positions(&image, &mark, &seed);
//! assert!(!positions.is_empty());
//! ```

use super::marker::PlacementSeed;

/// Dimensions of the target image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Dimensions of a rendered marker or overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkDimensions {
    pub width: u32,
    pub height: u32,
}

/// Top-left coordinate of one placement. May be negative (partially visible).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementPosition {
    pub x: i32,
    pub y: i32,
}

impl PlacementPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Image corner used for the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// Pick a corner from the seed.
    pub fn from_seed(seed: &PlacementSeed) -> Self {
        Self::ALL[seed.pick(SEED_WORD_CORNER, 4) as usize]
    }
}

// Seed word assignments.
const SEED_WORD_ORIGIN_X: usize = 0;
const SEED_WORD_ORIGIN_Y: usize = 1;
const SEED_WORD_GAP_X: usize = 2;
const SEED_WORD_GAP_Y: usize = 3;
const SEED_WORD_STAGGER: usize = 4;
const SEED_WORD_CORNER: usize = 5;

/// Tile the marker across the image starting from a seeded origin.
///
/// Rows are offset by a seeded stagger (brick pattern) and the gap between
/// tiles is jittered per pair. The grid is extended one step beyond every
/// edge so partially visible tiles still cover the borders.
pub fn tiled_positions(
    image: &ImageDimensions,
    mark: &MarkDimensions,
    seed: &PlacementSeed,
) -> Vec<PlacementPosition> {
    if image.width == 0 || image.height == 0 || mark.width == 0 || mark.height == 0 {
        return Vec::new();
    }

    // Horizontal gap between 1/2 and 1 marker width, vertical between 2 and 4 heights.
    let gap_x = mark.width / 2 + seed.pick(SEED_WORD_GAP_X, mark.width / 2 + 1);
    let gap_y = mark.height * 2 + seed.pick(SEED_WORD_GAP_Y, mark.height * 2 + 1);

    let step_x = (mark.width + gap_x) as i32;
    let step_y = (mark.height + gap_y) as i32;

    let origin_x = seed.pick(SEED_WORD_ORIGIN_X, step_x as u32) as i32;
    let origin_y = seed.pick(SEED_WORD_ORIGIN_Y, step_y as u32) as i32;
    let stagger = seed.pick(SEED_WORD_STAGGER, step_x as u32) as i32;

    let mut positions = Vec::new();
    let mut row = 0i32;
    let mut y = origin_y - step_y;
    while y < image.height as i32 {
        let row_shift = if row % 2 == 1 { stagger } else { 0 };
        let mut x = origin_x + row_shift - 2 * step_x;
        while x < image.width as i32 {
            let pos = PlacementPosition::new(x, y);
            if is_visible(&pos, image, mark) {
                positions.push(pos);
            }
            x += step_x;
        }
        y += step_y;
        row += 1;
    }

    positions
}

/// Position of an overlay in the given corner, `margin` pixels from the edges.
pub fn corner_position(
    corner: Corner,
    image: &ImageDimensions,
    mark: &MarkDimensions,
    margin: u32,
) -> PlacementPosition {
    let m = margin as i32;
    let right = image.width as i32 - mark.width as i32 - m;
    let bottom = image.height as i32 - mark.height as i32 - m;

    match corner {
        Corner::TopLeft => PlacementPosition::new(m, m),
        Corner::TopRight => PlacementPosition::new(right, m),
        Corner::BottomLeft => PlacementPosition::new(m, bottom),
        Corner::BottomRight => PlacementPosition::new(right, bottom),
    }
}

/// Check if a placement is at least partially visible within the image.
pub fn is_visible(pos: &PlacementPosition, image: &ImageDimensions, mark: &MarkDimensions) -> bool {
    let right = pos.x + mark.width as i32;
    let bottom = pos.y + mark.height as i32;

    pos.x < image.width as i32 && pos.y < image.height as i32 && right > 0 && bottom > 0
}
