// THEORY:
// A `SlotRegion` is the spatial unit of the occupancy classifier: one designated
// parking space, drawn once by an operator as a fixed-size rectangle in frame
// pixel coordinates. It is a "dumb" data container, like the frame itself. It
// knows its own geometry and how many foreground pixels it may hold before it
// counts as occupied, and nothing else.

use serde::{Deserialize, Serialize};

/// Default slot width in pixels, matching the reference camera layouts.
pub const DEFAULT_SLOT_WIDTH: u32 = 107;
/// Default slot height in pixels, matching the reference camera layouts.
pub const DEFAULT_SLOT_HEIGHT: u32 = 48;
/// Foreground pixel count at which a default-sized slot stops being free.
pub const DEFAULT_FREE_PIXEL_THRESHOLD: u32 = 900;

/// A rectangular parking slot in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRegion {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl SlotRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// A region of the default slot size anchored at `(x, y)`.
    pub fn at(x: u32, y: u32) -> Self {
        Self::new(x, y, DEFAULT_SLOT_WIDTH, DEFAULT_SLOT_HEIGHT)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// The foreground pixel count below which this region is free. The reference
    /// threshold of 900 belongs to a 107x48 region and scales with the area.
    pub fn free_pixel_threshold(&self) -> u32 {
        let reference_area = (DEFAULT_SLOT_WIDTH * DEFAULT_SLOT_HEIGHT) as u128;
        let scaled = DEFAULT_FREE_PIXEL_THRESHOLD as u128 * self.area() as u128;
        let threshold = (scaled + reference_area / 2) / reference_area;
        u32::try_from(threshold).unwrap_or(u32::MAX)
    }

    /// Clips the region to a frame of the given size, returning
    /// `(x0, y0, x1, y1)` with exclusive upper bounds. Empty when the region lies
    /// completely outside the frame.
    pub fn clip(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let x0 = self.x.min(frame_width);
        let y0 = self.y.min(frame_height);
        let x1 = self.x.saturating_add(self.width).min(frame_width);
        let y1 = self.y.saturating_add(self.height).min(frame_height);
        (x0, y0, x1, y1)
    }
}
