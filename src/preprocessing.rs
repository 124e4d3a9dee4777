// src/preprocessing.rs - Gamma correction, seeded salt-and-pepper noise and the denoising chain

use image::{GrayImage, Rgb, RgbImage};
use imageproc::filter::{bilateral_filter, gaussian_blur_f32, median_filter};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::PreprocessParams;
use crate::errors::{Result, SnakeFusionError};

/// Crop rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<[u32; 4]> for CropRect {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Self { x, y, width, height }
    }
}

/// Intermediate images of one preprocessing run
pub struct PreprocessStages {
    pub gamma_corrected: RgbImage,
    pub noisy: RgbImage,
    pub denoised: RgbImage,
    pub gray: GrayImage,
    /// Final image handed to segmentation
    pub bilateral: GrayImage,
}

/// Cut `rect` out of `image`; the rectangle must be non-empty and fully inside
pub fn crop_to_rect(image: &RgbImage, rect: CropRect) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    let fits = rect.width > 0
        && rect.height > 0
        && rect.x.checked_add(rect.width).map_or(false, |right| right <= width)
        && rect.y.checked_add(rect.height).map_or(false, |bottom| bottom <= height);
    if !fits {
        return Err(SnakeFusionError::invalid(format!(
            "crop {:?} does not fit into {}x{} image",
            rect, width, height
        )));
    }

    Ok(image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Apply `255 * (v / 255) ^ gamma` to every channel
pub fn gamma_correction(image: &RgbImage, gamma: f64) -> RgbImage {
    let lut: Vec<u8> = (0..=255u32)
        .map(|v| (255.0 * (v as f64 / 255.0).powf(gamma)) as u8)
        .collect();

    let mut corrected = image.clone();
    for pixel in corrected.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = lut[*channel as usize];
        }
    }
    corrected
}

/// Replace each pixel with black (probability `p/2`) or white (probability `p/2`)
pub fn add_salt_and_pepper_noise<R: Rng>(image: &RgbImage, probability: f64, rng: &mut R) -> RgbImage {
    let mut noisy = image.clone();
    for pixel in noisy.pixels_mut() {
        let r: f64 = rng.random();
        if r < probability / 2.0 {
            *pixel = Rgb([0, 0, 0]);
        } else if r < probability {
            *pixel = Rgb([255, 255, 255]);
        }
    }
    noisy
}

/// Repeated median filtering followed by a Gaussian blur
pub fn denoise(image: &RgbImage, params: &PreprocessParams) -> RgbImage {
    let radius = params.median_kernel_size / 2;
    let mut current = image.clone();
    for _ in 0..params.median_passes {
        current = median_filter(&current, radius, radius);
    }
    gaussian_blur_f32(&current, params.gaussian_sigma)
}

/// Edge-preserving smoothing of the denoised grayscale image
pub fn bilateral_smooth(gray: &GrayImage, params: &PreprocessParams) -> GrayImage {
    bilateral_filter(
        gray,
        params.bilateral_window,
        params.bilateral_sigma_color,
        params.bilateral_sigma_spatial,
    )
}

/// Luminance conversion
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Run the full chain and keep every intermediate image
pub fn preprocess_stages(image: &RgbImage, params: &PreprocessParams) -> Result<PreprocessStages> {
    params.validate()?;

    let gamma_corrected = gamma_correction(image, params.gamma_correction);
    let mut rng = StdRng::seed_from_u64(params.noise_seed);
    let noisy = add_salt_and_pepper_noise(&gamma_corrected, params.noise_probability, &mut rng);
    let denoised = denoise(&noisy, params);
    let gray = to_grayscale(&denoised);
    let bilateral = bilateral_smooth(&gray, params);

    debug!(
        "Preprocessed {}x{} image (gamma {}, noise p={} seed={}, {} median passes, bilateral window {})",
        image.width(),
        image.height(),
        params.gamma_correction,
        params.noise_probability,
        params.noise_seed,
        params.median_passes,
        params.bilateral_window
    );

    Ok(PreprocessStages {
        gamma_corrected,
        noisy,
        denoised,
        gray,
        bilateral,
    })
}

/// Grayscale image ready for segmentation; skips the chain when disabled
pub fn preprocess(image: &RgbImage, params: &PreprocessParams) -> Result<GrayImage> {
    if !params.enabled {
        return Ok(to_grayscale(image));
    }
    Ok(preprocess_stages(image, params)?.bilateral)
}
