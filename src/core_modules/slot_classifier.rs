// THEORY:
// The `slot_classifier` is the decision layer of the per-frame pipeline. It takes
// the occupancy mask produced by the Preprocessing Stage and the zone's ordered
// slot layout, and answers one question per slot: is it free?
//
// Key architectural principles:
// 1.  **Pixel Counting Heuristic**: A slot is free when the number of foreground
//     mask pixels inside its rectangle is strictly below the region's threshold.
//     This is a fixed heuristic, not a learned model.
// 2.  **Independence**: Slots are classified independently of each other. The order
//     of the layout only matters for the per-slot report, never for the count.
// 3.  **Stateless Utility**: Like the rest of the per-frame stages, the classifier
//     has no memory of previous frames.

use crate::core_modules::mask::OccupancyMask;
use crate::core_modules::slot_region::SlotRegion;

pub mod slot_classifier {
    use super::*;

    /// Occupancy verdict for a single slot in a single frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotReading {
        /// The region that was inspected.
        pub region: SlotRegion,
        /// Foreground pixels found inside the (frame-clipped) region.
        pub foreground_pixels: u32,
        /// True when `foreground_pixels` is below the region's threshold.
        pub is_free: bool,
    }

    /// Counts non-zero mask pixels inside a region, clipped to the mask bounds.
    pub fn count_foreground(mask: &OccupancyMask, region: &SlotRegion) -> u32 {
        let (x0, y0, x1, y1) = region.clip(mask.width(), mask.height());
        let mut count = 0u32;
        for y in y0..y1 {
            for x in x0..x1 {
                if mask.get_pixel(x, y).0[0] != 0 {
                    count += 1;
                }
            }
        }
        count
    }

    /// Classifies every region in layout order.
    pub fn classify_slots(mask: &OccupancyMask, layout: &[SlotRegion]) -> Vec<SlotReading> {
        layout
            .iter()
            .map(|region| {
                let foreground_pixels = count_foreground(mask, region);
                SlotReading {
                    region: *region,
                    foreground_pixels,
                    is_free: foreground_pixels < region.free_pixel_threshold(),
                }
            })
            .collect()
    }

    /// The number of free slots in the layout for this mask.
    pub fn count_free_slots(mask: &OccupancyMask, layout: &[SlotRegion]) -> u32 {
        classify_slots(mask, layout).iter().filter(|reading| reading.is_free).count() as u32
    }
}
