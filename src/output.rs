use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use bresenham::Bresenham;
use csv::Writer;
use image::{GrayImage, Rgb, RgbImage};
use serde::Serialize;

use crate::errors::Result;
use crate::evaluation::SegmentationMetrics;
use crate::image_utils::in_bounds;
use crate::region_fill::Seed;
use crate::snake::Contour;

const INITIAL_CONTOUR_COLOR: Rgb<u8> = Rgb([40, 40, 160]);
const FINAL_CONTOUR_COLOR: Rgb<u8> = Rgb([255, 90, 90]);
const SEED_COLOR: Rgb<u8> = Rgb([60, 220, 60]);

fn output_file(output_dir: &Path, filename: &str, extension: &str) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    Ok(output_dir.join(format!("{}.{}", filename, extension)))
}

/// Write the contour vertices as `Point_Index,Row,Col`
pub fn write_contour_csv<P: AsRef<Path>>(
    contour: &Contour,
    output_dir: P,
    filename: &str,
) -> Result<PathBuf> {
    let output_path = output_file(output_dir.as_ref(), filename, "csv")?;
    let mut writer = Writer::from_path(&output_path)?;

    writer.write_record(["Point_Index", "Row", "Col"])?;
    for (index, point) in contour.points().iter().enumerate() {
        writer.write_record(&[
            index.to_string(),
            format!("{:.6}", point.row),
            format!("{:.6}", point.col),
        ])?;
    }

    writer.flush()?;
    Ok(output_path)
}

/// Write one metrics row under a fixed header
pub fn write_metrics_csv<P: AsRef<Path>>(
    metrics: &SegmentationMetrics,
    output_dir: P,
    filename: &str,
) -> Result<PathBuf> {
    let output_path = output_file(output_dir.as_ref(), filename, "csv")?;
    let mut writer = Writer::from_path(&output_path)?;

    writer.write_record([
        "Image",
        "IoU",
        "Dice",
        "Precision",
        "Recall",
        "F1",
        "TP",
        "FP",
        "FN",
        "TN",
    ])?;
    writer.write_record(&[
        filename.to_string(),
        format!("{:.6}", metrics.iou),
        format!("{:.6}", metrics.dice),
        format!("{:.6}", metrics.precision),
        format!("{:.6}", metrics.recall),
        format!("{:.6}", metrics.f1),
        metrics.true_positive.to_string(),
        metrics.false_positive.to_string(),
        metrics.false_negative.to_string(),
        metrics.true_negative.to_string(),
    ])?;

    writer.flush()?;
    Ok(output_path)
}

/// Pretty-printed JSON summary of one processed image
pub fn write_summary_json<T: Serialize, P: AsRef<Path>>(
    summary: &T,
    output_dir: P,
    filename: &str,
) -> Result<PathBuf> {
    let output_path = output_file(output_dir.as_ref(), filename, "json")?;
    let writer = BufWriter::new(File::create(&output_path)?);
    serde_json::to_writer_pretty(writer, summary)?;
    Ok(output_path)
}

fn put_pixel_checked(image: &mut RgbImage, x: isize, y: isize, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if in_bounds(x as i32, y as i32, width, height) {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Rasterize the closed polygon through `contour`
fn draw_closed_contour(image: &mut RgbImage, contour: &Contour, color: Rgb<u8>) {
    let points: Vec<(isize, isize)> = contour
        .points()
        .iter()
        .map(|p| (p.col.round() as isize, p.row.round() as isize))
        .collect();

    for (i, &start) in points.iter().enumerate() {
        let end = points[(i + 1) % points.len()];
        for (x, y) in Bresenham::new(start, end) {
            put_pixel_checked(image, x, y, color);
        }
    }
}

fn draw_cross(image: &mut RgbImage, seed: Seed, arm: isize, color: Rgb<u8>) {
    let (cx, cy) = (seed.col as isize, seed.row as isize);
    for d in -arm..=arm {
        put_pixel_checked(image, cx + d, cy, color);
        put_pixel_checked(image, cx, cy + d, color);
    }
}

/// Grayscale background with the initial contour, the final contour and the seed drawn on top
pub fn render_contour_overlay(
    gray: &GrayImage,
    initial: &Contour,
    final_contour: &Contour,
    seed: Seed,
) -> RgbImage {
    let mut overlay = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });

    draw_closed_contour(&mut overlay, initial, INITIAL_CONTOUR_COLOR);
    draw_closed_contour(&mut overlay, final_contour, FINAL_CONTOUR_COLOR);
    draw_cross(&mut overlay, seed, 2, SEED_COLOR);

    overlay
}
