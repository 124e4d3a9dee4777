// src/lib.rs - Library interface for SnakeFusionR

pub mod config;
pub mod errors;
pub mod evaluation;
pub mod image_io;
pub mod image_utils;
pub mod output;
pub mod pipeline;
pub mod preprocessing;
pub mod region_fill;
pub mod snake;

// Re-export commonly used types and functions
pub use config::{Config, FloodParams, PreprocessParams, Roi, SnakeParams};
pub use errors::{Result, SnakeFusionError};
pub use image_io::{load_image, load_mask, InputImage};
pub use image_utils::{gray_to_intensity, intensity_from_dynamic, IntensityImage};
pub use pipeline::{process_image, SegmentationResult};

// Core stages
pub use snake::{
    evolve,
    initialize_contour,
    BoundaryMode,
    Contour,
    ContourPoint,
    EvolutionReport,
    EvolutionStatus,
    SnakeEngine,
};
pub use region_fill::{flood_fill, flood_mask, paint_region, Connectivity, RegionMask, Seed};

// Supporting stages
pub use evaluation::{evaluate, SegmentationMetrics};
pub use preprocessing::{
    add_salt_and_pepper_noise, bilateral_smooth, denoise, gamma_correction, preprocess, CropRect,
};
