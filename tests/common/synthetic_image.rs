use image::{GrayImage, ImageBuffer, Luma};
use snake_fusion_lib::{IntensityImage, RegionMask};

/// Whether pixel `(x, y)` lies inside the disk of `radius` around `(cx, cy)`
pub fn in_disk(x: u32, y: u32, cx: f64, cy: f64, radius: f64) -> bool {
    let dx = x as f64 - cx;
    let dy = y as f64 - cy;
    dx * dx + dy * dy <= radius * radius
}

/// Bright disk on a flat background, intensities in [0, 1]
pub fn disk_intensity(
    width: u32,
    height: u32,
    (cx, cy): (f64, f64),
    radius: f64,
    background: f32,
    foreground: f32,
) -> IntensityImage {
    assert!(width > 0 && height > 0, "image dimensions must be positive");
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([if in_disk(x, y, cx, cy, radius) { foreground } else { background }])
    })
}

/// 8-bit variant of [`disk_intensity`]
pub fn disk_gray(
    width: u32,
    height: u32,
    (cx, cy): (f64, f64),
    radius: f64,
    background: u8,
    foreground: u8,
) -> GrayImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([if in_disk(x, y, cx, cy, radius) { foreground } else { background }])
    })
}

/// Ground-truth mask of the same disk
pub fn disk_mask(width: u32, height: u32, center: (f64, f64), radius: f64) -> RegionMask {
    RegionMask::from_gray(&disk_gray(width, height, center, radius, 0, 255))
}
