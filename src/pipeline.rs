// src/pipeline.rs - Per-image segmentation pipeline: crop, denoise, evolve, fill, evaluate

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{Config, Roi};
use crate::errors::Result;
use crate::evaluation::{evaluate, SegmentationMetrics};
use crate::image_io::{load_mask, save_gray_image, save_rgb_image, InputImage};
use crate::image_utils::{gray_to_intensity, intensity_to_gray};
use crate::output::{render_contour_overlay, write_contour_csv, write_metrics_csv, write_summary_json};
use crate::preprocessing::{crop_to_rect, preprocess, preprocess_stages, to_grayscale, CropRect};
use crate::region_fill::{flood_mask, paint_region, Seed};
use crate::snake::{initialize_contour, ContourPoint, Contour, EvolutionReport, EvolutionStatus, SnakeEngine};

pub const CROPPED_DIR: &str = "cropped";
pub const FILTERED_DIR: &str = "filtered";
pub const CONTOURS_DIR: &str = "contours";
pub const SEGMENTED_DIR: &str = "segmented";
pub const METRICS_DIR: &str = "metrics";
pub const SUMMARY_DIR: &str = "summary";

/// Everything produced for one image
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub filename: String,
    pub roi: Roi,
    pub seed: Seed,
    pub initial_contour: Contour,
    pub report: EvolutionReport,
    pub mask_area: usize,
    pub metrics: Option<SegmentationMetrics>,
}

/// JSON summary written to `summary/<name>.json`
#[derive(Debug, Serialize)]
struct ImageSummary<'a> {
    filename: &'a str,
    width: u32,
    height: u32,
    roi: Roi,
    seed: Seed,
    iterations: usize,
    status: EvolutionStatus,
    final_displacement: f64,
    contour_points: usize,
    contour_centroid: ContourPoint,
    contour_mean_radius: f64,
    mask_area: usize,
    metrics: Option<SegmentationMetrics>,
}

/// Create the per-stage output directories under `base`
pub fn ensure_output_directories<P: AsRef<Path>>(base: P) -> Result<()> {
    let base = base.as_ref();
    for dir in [CROPPED_DIR, FILTERED_DIR, CONTOURS_DIR, SEGMENTED_DIR, METRICS_DIR, SUMMARY_DIR] {
        fs::create_dir_all(base.join(dir))?;
    }
    Ok(())
}

/// Ground-truth mask for `filename`: the configured file itself, or `<dir>/<filename>.png`
fn resolve_ground_truth(config: &Config, filename: &str) -> Option<PathBuf> {
    let configured = PathBuf::from(config.ground_truth_path.as_ref()?);
    if configured.is_dir() {
        let candidate = configured.join(format!("{}.png", filename));
        if candidate.is_file() {
            Some(candidate)
        } else {
            warn!("No ground truth for {} in {}", filename, configured.display());
            None
        }
    } else {
        Some(configured)
    }
}

/// Run the whole segmentation chain on one image and write its outputs
pub fn process_image(input_image: InputImage, config: &Config, debug: bool) -> Result<SegmentationResult> {
    let InputImage { image, path, filename } = input_image;
    let output_base = PathBuf::from(&config.output_base_dir);
    ensure_output_directories(&output_base)?;

    // Step 1: crop to the configured rectangle
    let rgb = image.to_rgb8();
    info!("Processing {} ({}x{})", path.display(), rgb.width(), rgb.height());
    let rgb = match config.crop {
        Some(rect) => {
            let cropped = crop_to_rect(&rgb, CropRect::from(rect))?;
            save_rgb_image(&cropped, output_base.join(CROPPED_DIR).join(format!("{}.png", filename)))?;
            cropped
        }
        None => rgb,
    };

    // Step 2: noise injection, denoising and bilateral smoothing
    let filtered_dir = output_base.join(FILTERED_DIR);
    let gray = if config.preprocess.enabled && debug {
        let stages = preprocess_stages(&rgb, &config.preprocess)?;
        save_rgb_image(&stages.gamma_corrected, filtered_dir.join(format!("{}_gamma.png", filename)))?;
        save_rgb_image(&stages.noisy, filtered_dir.join(format!("{}_noisy.png", filename)))?;
        save_rgb_image(&stages.denoised, filtered_dir.join(format!("{}_denoised.png", filename)))?;
        save_gray_image(&stages.gray, filtered_dir.join(format!("{}_gray.png", filename)))?;
        stages.bilateral
    } else if config.preprocess.enabled {
        preprocess(&rgb, &config.preprocess)?
    } else {
        to_grayscale(&rgb)
    };
    save_gray_image(&gray, filtered_dir.join(format!("{}.png", filename)))?;

    let intensity = gray_to_intensity(&gray);
    let (width, height) = intensity.dimensions();

    // Step 3: contour evolution from the ROI circle
    let roi = config.roi.unwrap_or_else(|| Roi::centered(width, height));
    let seed = roi.seed()?;
    let initial_contour = initialize_contour(roi.center_x, roi.center_y, roi.radius, config.contour_points)?;

    let engine = SnakeEngine::new(&intensity, config.contour_points, &config.snake)?;
    let report = engine.run(initial_contour.clone())?;
    info!(
        "{}: snake {:?} after {} iterations (mean displacement {:.4})",
        filename, report.status, report.iterations, report.final_displacement
    );

    let contours_dir = output_base.join(CONTOURS_DIR);
    write_contour_csv(&report.contour, &contours_dir, &filename)?;
    let overlay = render_contour_overlay(&gray, &initial_contour, &report.contour, seed);
    save_rgb_image(&overlay, contours_dir.join(format!("{}.png", filename)))?;

    // Step 4: region fusion from the ROI centre
    let mask = flood_mask(&intensity, seed, config.flood.tolerance, config.flood.connectivity.into())?;
    let filled = paint_region(&intensity, &mask, config.flood.fill_value);
    let mask_area = mask.area();
    info!("{}: flood fill from {:?} covers {} pixels", filename, seed, mask_area);

    let segmented_dir = output_base.join(SEGMENTED_DIR);
    save_gray_image(&mask.to_gray_image(), segmented_dir.join(format!("{}_mask.png", filename)))?;
    save_gray_image(&intensity_to_gray(&filled), segmented_dir.join(format!("{}_filled.png", filename)))?;

    // Step 5: evaluation against ground truth
    let metrics = match resolve_ground_truth(config, &filename) {
        Some(truth_path) => {
            debug!("Evaluating {} against {}", filename, truth_path.display());
            let truth = load_mask(&truth_path)?;
            let metrics = evaluate(&mask, &truth)?;
            write_metrics_csv(&metrics, output_base.join(METRICS_DIR), &filename)?;
            info!("{}: IoU {:.4}, Dice {:.4}", filename, metrics.iou, metrics.dice);
            Some(metrics)
        }
        None => None,
    };

    let centroid = report.contour.centroid();
    let summary = ImageSummary {
        filename: &filename,
        width,
        height,
        roi,
        seed,
        iterations: report.iterations,
        status: report.status,
        final_displacement: report.final_displacement,
        contour_points: report.contour.len(),
        contour_centroid: centroid,
        contour_mean_radius: report.contour.mean_radius(centroid),
        mask_area,
        metrics,
    };
    write_summary_json(&summary, output_base.join(SUMMARY_DIR), &filename)?;

    Ok(SegmentationResult {
        filename,
        roi,
        seed,
        initial_contour,
        report,
        mask_area,
        metrics,
    })
}
