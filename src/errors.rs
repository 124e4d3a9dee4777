use thiserror::Error;
use std::io;
use std::path::PathBuf;

use crate::snake::Contour;

/// Custom error types for SnakeFusionR
#[derive(Error, Debug)]
pub enum SnakeFusionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The solve produced NaN/inf coordinates. `last_valid` is the contour
    /// from the last iteration whose coordinates were all finite.
    #[error("Numerical divergence at iteration {iteration} ({} points in last valid contour)", .last_valid.len())]
    NumericalDivergence {
        iteration: usize,
        last_valid: Contour,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        source: toml::de::Error,
        path: PathBuf,
    },

    #[error("CSV output error: {0}")]
    CsvOutput(#[from] csv::Error),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input path: {0}")]
    InvalidPath(PathBuf),
}

/// Type alias for Result with our custom error type
pub type Result<T> = std::result::Result<T, SnakeFusionError>;

impl SnakeFusionError {
    /// Shorthand used by the validation paths
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        SnakeFusionError::InvalidInput(msg.into())
    }
}
