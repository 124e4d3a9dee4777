use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

use crate::errors::{Result, SnakeFusionError};
use crate::region_fill::RegionMask;

/// An image loaded from disk together with where it came from
pub struct InputImage {
    pub image: DynamicImage,
    pub path: PathBuf,
    pub filename: String,
}

/// Get all PNG files from a directory (recursively), sorted by path
pub fn get_png_files_in_dir<P: AsRef<Path>>(dir_path: P) -> Result<Vec<PathBuf>> {
    let dir_path = dir_path.as_ref();

    if !dir_path.exists() {
        return Err(SnakeFusionError::InvalidPath(dir_path.to_path_buf()));
    }

    if !dir_path.is_dir() {
        return Err(SnakeFusionError::Config(format!(
            "{} is not a directory",
            dir_path.display()
        )));
    }

    let mut png_files = Vec::new();
    collect_png_files(dir_path, &mut png_files)?;
    png_files.sort();

    Ok(png_files)
}

fn collect_png_files(dir_path: &Path, result: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_png_files(&path, result)?;
        } else if is_png(&path) {
            result.push(path);
        }
    }

    Ok(())
}

fn is_png(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("png"))
}

/// Load an image in whatever colour layout it was stored with
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<InputImage> {
    let path = path.as_ref();

    let filename = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SnakeFusionError::InvalidPath(path.to_path_buf()))?
        .to_string();

    let image = image::open(path)?;

    Ok(InputImage {
        image,
        path: path.to_path_buf(),
        filename,
    })
}

/// Load a binary ground-truth mask; any non-zero luminance is foreground
pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<RegionMask> {
    let image = image::open(path.as_ref())?;
    Ok(RegionMask::from_gray(&image.to_luma8()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Save a grayscale image as PNG
pub fn save_gray_image<P: AsRef<Path>>(image: &GrayImage, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save an RGB image as PNG
pub fn save_rgb_image<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
