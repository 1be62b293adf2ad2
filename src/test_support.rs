use crate::core_modules::mask::Frame;
use crate::core_modules::slot_region::SlotRegion;
use image::Rgb;

pub(crate) const LOT_WIDTH: u32 = 540;
pub(crate) const LOT_HEIGHT: u32 = 160;

/// Two rows of four default-sized slots with room between them.
pub(crate) fn eight_slot_layout() -> Vec<SlotRegion> {
    let mut layout = Vec::new();
    for row in 0..2 {
        for col in 0..4 {
            layout.push(SlotRegion::at(10 + col * 130, 10 + row * 70));
        }
    }
    layout
}

/// A bright, empty lot with the first `occupied` slots holding a "car": 8px dark
/// vertical stripes that the preprocessing chain turns into dense foreground.
pub(crate) fn parking_frame(layout: &[SlotRegion], occupied: usize) -> Frame {
    let mut frame = Frame::from_pixel(LOT_WIDTH, LOT_HEIGHT, Rgb([255, 255, 255]));
    for region in layout.iter().take(occupied) {
        for y in region.y..region.y + region.height {
            for x in region.x..region.x + region.width {
                if ((x - region.x) / 8) % 2 == 0 {
                    frame.put_pixel(x, y, Rgb([0, 0, 0]));
                }
            }
        }
    }
    frame
}
