// THEORY:
// The `mask` module is the Preprocessing Stage. It turns a raw color frame into a
// binary "occupancy mask" in which bright pixels mark places where the picture is
// locally darker than its surroundings: car bodies, shadows, wheel arches. Empty
// asphalt is locally uniform and stays dark in the mask.
//
// Key architectural principles:
// 1.  **Fixed Chain**: The chain and every parameter are fixed. The downstream slot
//     threshold (900 pixels in a 107x48 slot) was calibrated against exactly this
//     chain, so changing a kernel size silently changes what "occupied" means.
// 2.  **Pure Function**: `occupancy_mask` reads the frame and returns a new image.
//     No state survives between frames, which keeps the zone loop trivially
//     restartable and lets tests drive single frames.
// 3.  **Stage Order**:
//     - intensity (fixed-point luma weights)
//     - Gaussian smoothing 3x3, sigma 1, reflect-101 border
//     - inverted adaptive threshold against a 25x25 Gaussian local mean, offset 16
//     - 5x5 median to drop speckle
//     - 3x3 dilation to close small gaps

use image::{GrayImage, Luma, RgbImage};

/// A decoded video frame in RGB order.
pub type Frame = RgbImage;
/// Single-channel binary image, 255 = foreground, 0 = background.
pub type OccupancyMask = GrayImage;

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

const BLUR_KERNEL_SIZE: usize = 3;
const BLUR_SIGMA: f64 = 1.0;
const THRESHOLD_BLOCK_SIZE: usize = 25;
const THRESHOLD_OFFSET: i32 = 16;
const MEDIAN_KERNEL_SIZE: usize = 5;

// Fixed-point luma weights (Q14) for R, G and B.
const LUMA_RED: u32 = 4899;
const LUMA_GREEN: u32 = 9617;
const LUMA_BLUE: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Border {
    /// `gfedcb|abcdefgh|gfedcba`
    Reflect101,
    /// `aaaaaa|abcdefgh|hhhhhhh`
    Replicate,
}

/// Runs the full preprocessing chain on one frame.
pub fn occupancy_mask(frame: &Frame) -> OccupancyMask {
    let intensity = to_intensity(frame);
    let smoothed = gaussian_blur(&intensity, BLUR_KERNEL_SIZE, BLUR_SIGMA);
    let thresholded = adaptive_threshold_inverted(&smoothed, THRESHOLD_BLOCK_SIZE, THRESHOLD_OFFSET);
    let despeckled = median_filter(&thresholded, MEDIAN_KERNEL_SIZE);
    dilate_3x3(&despeckled)
}

/// Converts an RGB frame to single-channel intensity.
pub fn to_intensity(frame: &Frame) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let weighted = r as u32 * LUMA_RED + g as u32 * LUMA_GREEN + b as u32 * LUMA_BLUE;
        Luma([((weighted + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8])
    })
}

/// Normalized 1D Gaussian weights. A non-positive sigma is derived from the size.
pub fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f64> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size as f64 - 1.0) / 2.0;
    let scale = -0.5 / (sigma * sigma);

    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let offset = i as f64 - center;
            (scale * offset * offset).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|weight| *weight /= sum);
    kernel
}

/// Separable Gaussian smoothing with a reflect-101 border.
pub fn gaussian_blur(src: &GrayImage, size: usize, sigma: f64) -> GrayImage {
    separable_convolve(src, &gaussian_kernel(size, sigma), Border::Reflect101)
}

/// Marks pixels that are at least `offset` darker than their Gaussian-weighted
/// `block_size` neighborhood. Marked pixels become `MASK_ON`.
pub fn adaptive_threshold_inverted(src: &GrayImage, block_size: usize, offset: i32) -> GrayImage {
    let local_mean = separable_convolve(src, &gaussian_kernel(block_size, 0.0), Border::Replicate);
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        let value = src.get_pixel(x, y).0[0] as i32;
        let mean = local_mean.get_pixel(x, y).0[0] as i32;
        if value - mean <= -offset {
            Luma([MASK_ON])
        } else {
            Luma([MASK_OFF])
        }
    })
}

/// Square median filter with a replicated border.
pub fn median_filter(src: &GrayImage, size: usize) -> GrayImage {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let radius = (size / 2) as isize;
    let data = src.as_raw();
    let mut window: Vec<u8> = Vec::with_capacity(size * size);

    let mut out = GrayImage::new(src.width(), src.height());
    for y in 0..height {
        for x in 0..width {
            window.clear();
            for dy in -radius..=radius {
                let sy = border_index(y as isize + dy, height, Border::Replicate);
                for dx in -radius..=radius {
                    let sx = border_index(x as isize + dx, width, Border::Replicate);
                    window.push(data[sy * width + sx]);
                }
            }
            let middle = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable(middle);
            out.put_pixel(x as u32, y as u32, Luma([*median]));
        }
    }
    out
}

/// One iteration of dilation with a 3x3 all-ones element. Pixels outside the
/// frame do not contribute.
pub fn dilate_3x3(src: &GrayImage) -> GrayImage {
    let (width, height) = (src.width() as isize, src.height() as isize);
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        let mut max = 0u8;
        for dy in -1..=1isize {
            let sy = y as isize + dy;
            if sy < 0 || sy >= height {
                continue;
            }
            for dx in -1..=1isize {
                let sx = x as isize + dx;
                if sx < 0 || sx >= width {
                    continue;
                }
                max = max.max(src.get_pixel(sx as u32, sy as u32).0[0]);
            }
        }
        Luma([max])
    })
}

fn separable_convolve(src: &GrayImage, kernel: &[f64], border: Border) -> GrayImage {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let radius = (kernel.len() / 2) as isize;
    let data = src.as_raw();

    // --- 1. Horizontal pass, kept in floating point ---
    let mut horizontal = vec![0.0f64; width * height];
    for y in 0..height {
        let row = &data[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = border_index(x as isize + k as isize - radius, width, border);
                acc += weight * row[sx] as f64;
            }
            horizontal[y * width + x] = acc;
        }
    }

    // --- 2. Vertical pass, rounded back to bytes ---
    let mut out = GrayImage::new(src.width(), src.height());
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = border_index(y as isize + k as isize - radius, height, border);
                acc += weight * horizontal[sy * width + x];
            }
            out.put_pixel(x as u32, y as u32, Luma([acc.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn border_index(index: isize, len: usize, border: Border) -> usize {
    let last = len as isize - 1;
    if last <= 0 {
        return 0;
    }
    match border {
        Border::Replicate => index.clamp(0, last) as usize,
        Border::Reflect101 => {
            let mut index = index;
            loop {
                if index < 0 {
                    index = -index;
                } else if index > last {
                    index = 2 * last - index;
                } else {
                    return index as usize;
                }
            }
        }
    }
}
