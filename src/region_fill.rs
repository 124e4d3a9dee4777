// src/region_fill.rs - Seeded flood fill (region fusion) over an intensity image

use image::{GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub use imageproc::region_labelling::Connectivity;

use crate::errors::{Result, SnakeFusionError};
use crate::image_utils::{in_bounds, validate_intensity_image, IntensityImage};

const FOUR_NEIGHBOURS: [(i32, i32); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];
const EIGHT_NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Flood-fill start pixel `(row, col)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    pub row: u32,
    pub col: u32,
}

/// Boolean mask with the same dimensions as the image it was grown on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl RegionMask {
    /// Empty mask
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![false; (width as usize) * (height as usize)],
        }
    }

    /// Any non-zero pixel counts as foreground
    pub fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let mut mask = Self::new(width, height);
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel[0] > 0 {
                mask.insert(y, x);
            }
        }
        mask
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    fn index(&self, row: u32, col: u32) -> usize {
        row as usize * self.width as usize + col as usize
    }

    #[inline]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        self.cells[self.index(row, col)]
    }

    #[inline]
    pub fn insert(&mut self, row: u32, col: u32) {
        let index = self.index(row, col);
        self.cells[index] = true;
    }

    /// Number of pixels in the region
    pub fn area(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Row-major cell values
    pub fn cells(&self) -> &[bool] {
        &self.cells
    }

    /// 255 inside the region, 0 elsewhere
    pub fn to_gray_image(&self) -> GrayImage {
        ImageBuffer::from_fn(self.width, self.height, |x, y| {
            Luma([if self.contains(y, x) { 255 } else { 0 }])
        })
    }
}

fn validate_seed(image: &IntensityImage, seed: Seed) -> Result<()> {
    let (width, height) = image.dimensions();
    if seed.row >= height || seed.col >= width {
        return Err(SnakeFusionError::invalid(format!(
            "seed ({}, {}) is outside the {}x{} image",
            seed.row, seed.col, width, height
        )));
    }
    Ok(())
}

fn validate_tolerance(tolerance: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&tolerance) {
        return Err(SnakeFusionError::invalid(format!(
            "tolerance must be between 0.0 and 1.0, got {}",
            tolerance
        )));
    }
    Ok(())
}

/// Grow a region from `seed` over pixels whose intensity is within `tolerance` of the seed's.
///
/// Each pixel is marked when it is first queued and never expanded twice, so the
/// fill is linear in the image size. The result does not depend on visiting order.
pub fn flood_mask(
    image: &IntensityImage,
    seed: Seed,
    tolerance: f64,
    connectivity: Connectivity,
) -> Result<RegionMask> {
    validate_intensity_image(image)?;
    validate_seed(image, seed)?;
    validate_tolerance(tolerance)?;

    let (width, height) = image.dimensions();
    let reference = image.get_pixel(seed.col, seed.row)[0] as f64;
    let neighbours: &[(i32, i32)] = match connectivity {
        Connectivity::Four => &FOUR_NEIGHBOURS,
        Connectivity::Eight => &EIGHT_NEIGHBOURS,
    };

    let mut mask = RegionMask::new(width, height);
    let mut queue = VecDeque::new();
    mask.insert(seed.row, seed.col);
    queue.push_back((seed.col, seed.row));

    while let Some((x, y)) = queue.pop_front() {
        for &(dx, dy) in neighbours {
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            if !in_bounds(nx, ny, width, height) {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if mask.contains(ny, nx) {
                continue;
            }
            let value = image.get_pixel(nx, ny)[0] as f64;
            if (value - reference).abs() <= tolerance {
                mask.insert(ny, nx);
                queue.push_back((nx, ny));
            }
        }
    }

    Ok(mask)
}

/// Copy of `image` with `mask` pixels set to `value`
pub fn paint_region(image: &IntensityImage, mask: &RegionMask, value: f32) -> IntensityImage {
    let mut filled = image.clone();
    for (x, y, pixel) in filled.enumerate_pixels_mut() {
        if mask.contains(y, x) {
            pixel[0] = value;
        }
    }
    filled
}

/// Flood fill from `seed`, writing `target_value` into the grown region and
/// leaving every other pixel at its original intensity.
pub fn flood_fill(
    image: &IntensityImage,
    seed: Seed,
    target_value: f32,
    tolerance: f64,
    connectivity: Connectivity,
) -> Result<IntensityImage> {
    if !(0.0..=1.0).contains(&target_value) {
        return Err(SnakeFusionError::invalid(format!(
            "target value must be between 0.0 and 1.0, got {}",
            target_value
        )));
    }
    let mask = flood_mask(image, seed, tolerance, connectivity)?;
    Ok(paint_region(image, &mask, target_value))
}
