// src/image_utils.rs - Intensity image helpers shared by the snake and flood-fill stages

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;

use crate::errors::{Result, SnakeFusionError};

/// Single-channel image with intensities normalized to [0, 1]
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Convert an 8-bit grayscale image to normalized intensities
pub fn gray_to_intensity(gray: &GrayImage) -> IntensityImage {
    let (width, height) = gray.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        Luma([gray.get_pixel(x, y)[0] as f32 / 255.0])
    })
}

/// Convert normalized intensities back to an 8-bit grayscale image
pub fn intensity_to_gray(image: &IntensityImage) -> GrayImage {
    let (width, height) = image.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let value = image.get_pixel(x, y)[0].clamp(0.0, 1.0);
        Luma([(value * 255.0).round() as u8])
    })
}

/// Convert a decoded image to normalized intensities.
///
/// Only single-channel images are accepted; color images must be converted
/// to grayscale by the caller first.
pub fn intensity_from_dynamic(image: &DynamicImage) -> Result<IntensityImage> {
    let channels = image.color().channel_count();
    if channels != 1 {
        return Err(SnakeFusionError::invalid(format!(
            "expected a single-channel image, got {} channels",
            channels
        )));
    }

    let intensity = match image {
        DynamicImage::ImageLuma16(buffer) => {
            let (width, height) = buffer.dimensions();
            ImageBuffer::from_fn(width, height, |x, y| {
                Luma([buffer.get_pixel(x, y)[0] as f32 / 65535.0])
            })
        }
        other => gray_to_intensity(&other.to_luma8()),
    };

    validate_intensity_image(&intensity)?;
    Ok(intensity)
}

/// Check that an image is non-empty and all intensities are finite and in [0, 1]
pub fn validate_intensity_image(image: &IntensityImage) -> Result<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SnakeFusionError::invalid(format!(
            "image must be non-empty, got {}x{}",
            width, height
        )));
    }

    if let Some((x, y, pixel)) = image
        .enumerate_pixels()
        .find(|(_, _, p)| !p[0].is_finite() || p[0] < 0.0 || p[0] > 1.0)
    {
        return Err(SnakeFusionError::invalid(format!(
            "intensity {} at ({}, {}) is outside [0, 1]",
            pixel[0], x, y
        )));
    }

    Ok(())
}

/// Check if a point is inside the image bounds
#[inline]
pub fn in_bounds(x: i32, y: i32, width: u32, height: u32) -> bool {
    x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height
}

/// Pixel lookup with clamp-to-edge for out-of-range integer coordinates
#[inline]
fn pixel_clamped(image: &IntensityImage, x: i64, y: i64) -> f64 {
    let (width, height) = image.dimensions();
    let cx = x.clamp(0, width as i64 - 1) as u32;
    let cy = y.clamp(0, height as i64 - 1) as u32;
    image.get_pixel(cx, cy)[0] as f64
}

/// Sample `image` at a sub-pixel `(row, col)` position by bilinear interpolation.
///
/// Boundary policy: the position is clamped to `[0, h-1] x [0, w-1]` before
/// interpolating, so anything outside the grid reads the nearest edge value.
/// The image must be non-empty.
pub fn sample_bilinear(image: &IntensityImage, row: f64, col: f64) -> f64 {
    let (width, height) = image.dimensions();
    debug_assert!(width > 0 && height > 0);

    let r = row.clamp(0.0, (height - 1) as f64);
    let c = col.clamp(0.0, (width - 1) as f64);

    let r0 = r.floor() as u32;
    let c0 = c.floor() as u32;
    let r1 = (r0 + 1).min(height - 1);
    let c1 = (c0 + 1).min(width - 1);
    let tr = r - r0 as f64;
    let tc = c - c0 as f64;

    let p = |x: u32, y: u32| image.get_pixel(x, y)[0] as f64;
    let top = p(c0, r0) * (1.0 - tc) + p(c1, r0) * tc;
    let bottom = p(c0, r1) * (1.0 - tc) + p(c1, r1) * tc;

    top * (1.0 - tr) + bottom * tr
}

/// Gaussian smoothing of an intensity image.
///
/// `sigma <= 0` returns an unchanged copy, since imageproc rejects a non-positive sigma.
pub fn gaussian_smooth(image: &IntensityImage, sigma: f64) -> IntensityImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    gaussian_blur_f32(image, sigma as f32)
}

/// Sobel gradient magnitude (kernels scaled by 1/8 so a unit ramp gives 1.0)
pub fn sobel_magnitude(image: &IntensityImage) -> IntensityImage {
    const SOBEL_X: [[f64; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
    const SOBEL_Y: [[f64; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

    let (width, height) = image.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let mut gx = 0.0;
        let mut gy = 0.0;
        for ky in 0..3 {
            for kx in 0..3 {
                let value = pixel_clamped(image, x as i64 + kx as i64 - 1, y as i64 + ky as i64 - 1);
                gx += value * SOBEL_X[ky][kx];
                gy += value * SOBEL_Y[ky][kx];
            }
        }
        Luma([((gx * gx + gy * gy).sqrt() / 8.0) as f32])
    })
}

/// Spatial derivatives `(d/drow, d/dcol)`: central differences inside, one-sided at the borders
pub fn central_gradient(image: &IntensityImage) -> (IntensityImage, IntensityImage) {
    let (width, height) = image.dimensions();

    let derivative = |before: f64, after: f64, span: u32| {
        if span == 0 {
            0.0
        } else {
            ((after - before) / span as f64) as f32
        }
    };

    let d_row = ImageBuffer::from_fn(width, height, |x, y| {
        let lo = y.saturating_sub(1);
        let hi = (y + 1).min(height - 1);
        let before = image.get_pixel(x, lo)[0] as f64;
        let after = image.get_pixel(x, hi)[0] as f64;
        Luma([derivative(before, after, hi - lo)])
    });

    let d_col = ImageBuffer::from_fn(width, height, |x, y| {
        let lo = x.saturating_sub(1);
        let hi = (x + 1).min(width - 1);
        let before = image.get_pixel(lo, y)[0] as f64;
        let after = image.get_pixel(hi, y)[0] as f64;
        Luma([derivative(before, after, hi - lo)])
    });

    (d_row, d_col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use image::RgbImage;

    fn ramp(width: u32, height: u32) -> IntensityImage {
        ImageBuffer::from_fn(width, height, |x, _| Luma([x as f32 / (width - 1) as f32]))
    }

    #[test]
    fn bilinear_matches_pixels_at_integer_positions() {
        let image = ramp(5, 4);
        assert_approx_eq!(sample_bilinear(&image, 2.0, 3.0), 0.75, 1e-6);
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let image = ramp(5, 4);
        assert_approx_eq!(sample_bilinear(&image, 1.3, 1.5), 0.375, 1e-6);
    }

    #[test]
    fn bilinear_clamps_outside_the_grid() {
        let image = ramp(5, 4);
        assert_approx_eq!(sample_bilinear(&image, -3.0, -10.0), 0.0, 1e-6);
        assert_approx_eq!(sample_bilinear(&image, 99.0, 42.0), 1.0, 1e-6);
    }

    #[test]
    fn smoothing_keeps_constant_image() {
        let image: IntensityImage = ImageBuffer::from_pixel(12, 9, Luma([0.4]));
        let smoothed = gaussian_smooth(&image, 2.5);
        for pixel in smoothed.pixels() {
            assert_approx_eq!(pixel[0], 0.4f32, 1e-5);
        }
    }

    #[test]
    fn smoothing_spreads_a_step_symmetrically() {
        let step: IntensityImage = ImageBuffer::from_fn(40, 5, |x, _| Luma([if x < 20 { 0.0 } else { 1.0 }]));
        let smoothed = gaussian_smooth(&step, 3.0);
        let left = smoothed.get_pixel(18, 2)[0];
        let right = smoothed.get_pixel(21, 2)[0];
        assert!(left > 0.0 && left < 0.5);
        assert_approx_eq!(left + right, 1.0f32, 1e-4);
        assert_approx_eq!(smoothed.get_pixel(0, 2)[0], 0.0f32, 1e-5);
        assert_approx_eq!(smoothed.get_pixel(39, 2)[0], 1.0f32, 1e-5);
    }

    #[test]
    fn non_positive_sigma_is_identity() {
        let image = ramp(6, 4);
        assert_eq!(gaussian_smooth(&image, 0.0), image);
        assert_eq!(gaussian_smooth(&image, -1.0), image);
    }

    #[test]
    fn sobel_of_unit_ramp_is_slope() {
        let image: IntensityImage = ImageBuffer::from_fn(8, 8, |x, _| Luma([x as f32 * 0.1]));
        let magnitude = sobel_magnitude(&image);
        assert_approx_eq!(magnitude.get_pixel(4, 4)[0], 0.1f32, 1e-5);
        assert_approx_eq!(magnitude.get_pixel(4, 0)[0], 0.1f32, 1e-5);
    }

    #[test]
    fn central_gradient_of_ramp() {
        let image: IntensityImage = ImageBuffer::from_fn(6, 6, |x, y| Luma([0.05 * x as f32 + 0.1 * y as f32]));
        let (d_row, d_col) = central_gradient(&image);
        assert_approx_eq!(d_row.get_pixel(2, 3)[0], 0.1f32, 1e-5);
        assert_approx_eq!(d_col.get_pixel(2, 3)[0], 0.05f32, 1e-5);
        assert_approx_eq!(d_col.get_pixel(0, 0)[0], 0.05f32, 1e-5);
        assert_approx_eq!(d_row.get_pixel(5, 5)[0], 0.1f32, 1e-5);
    }

    #[test]
    fn color_images_are_rejected() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        assert!(matches!(
            intensity_from_dynamic(&rgb),
            Err(SnakeFusionError::InvalidInput(_))
        ));
    }

    #[test]
    fn gray_images_are_normalized() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 2, Luma([255])));
        let intensity = intensity_from_dynamic(&gray).unwrap();
        assert_eq!(intensity.dimensions(), (3, 2));
        assert_approx_eq!(intensity.get_pixel(1, 1)[0], 1.0f32, 1e-6);
    }

    #[test]
    fn empty_image_is_invalid() {
        let empty: IntensityImage = ImageBuffer::new(0, 5);
        assert!(validate_intensity_image(&empty).is_err());
    }
}
