// src/config.rs - Configuration for the segmentation pipeline and its two core stages

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use imageproc::region_labelling::Connectivity;

use crate::errors::{Result, SnakeFusionError};
use crate::region_fill::Seed;
use crate::snake::BoundaryMode;

/// Configuration for SnakeFusionR
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub input_path: String,
    pub output_base_dir: String,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    /// Number of points on the initial circular contour
    #[serde(default = "default_contour_points")]
    pub contour_points: usize,

    /// Optional crop rectangle `[x, y, width, height]` applied before anything else
    #[serde(default)]
    pub crop: Option<[u32; 4]>,

    /// Ground-truth mask file, or a directory holding `<name>.png` masks
    #[serde(default)]
    pub ground_truth_path: Option<String>,

    /// Region of interest in (cropped) image coordinates. Defaults to the image centre.
    #[serde(default)]
    pub roi: Option<Roi>,

    #[serde(default)]
    pub snake: SnakeParams,

    #[serde(default)]
    pub flood: FloodParams,

    #[serde(default)]
    pub preprocess: PreprocessParams,
}

/// Circle descriptor used for the initial contour and the flood-fill seed
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Roi {
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
}

impl Roi {
    /// Centred ROI covering 35% of the smaller image dimension
    pub fn centered(width: u32, height: u32) -> Self {
        Self {
            center_x: (width as f64 - 1.0) / 2.0,
            center_y: (height as f64 - 1.0) / 2.0,
            radius: 0.35 * width.min(height) as f64,
        }
    }

    /// Flood-fill seed at the rounded ROI centre
    pub fn seed(&self) -> Result<Seed> {
        let row = self.center_y.round();
        let col = self.center_x.round();
        if !row.is_finite() || !col.is_finite() || row < 0.0 || col < 0.0 {
            return Err(SnakeFusionError::invalid(format!(
                "ROI centre ({}, {}) cannot be used as a seed",
                self.center_x, self.center_y
            )));
        }
        Ok(Seed {
            row: row as u32,
            col: col as u32,
        })
    }
}

/// Energy configuration for one snake evolution run
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SnakeParams {
    /// Elasticity weight (first-derivative term)
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Rigidity weight (second-derivative term)
    #[serde(default = "default_beta")]
    pub beta: f64,

    /// Step-size parameter; the implicit time step is `1 / gamma`
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    #[serde(default = "default_w_line")]
    pub w_line: f64,

    #[serde(default = "default_w_edge")]
    pub w_edge: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Mean per-point displacement (pixels) below which the run stops
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,

    #[serde(default)]
    pub boundary_mode: BoundaryMode,

    /// Gaussian sigma applied to the image before building the external potential
    #[serde(default = "default_smoothing_sigma")]
    pub smoothing_sigma: f64,

    /// Upper bound on how far a point moves in one iteration
    #[serde(default = "default_max_px_move")]
    pub max_px_move: f64,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,
}

/// Parameters of the region fusion (flood fill) stage
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FloodParams {
    /// Maximum intensity difference to the seed, in [0, 1]
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Intensity written into filled pixels
    #[serde(default = "default_fill_value")]
    pub fill_value: f32,

    #[serde(default)]
    pub connectivity: ConnectivityChoice,
}

/// Serializable mirror of `imageproc`'s connectivity
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityChoice {
    #[default]
    Four,
    Eight,
}

impl From<ConnectivityChoice> for Connectivity {
    fn from(choice: ConnectivityChoice) -> Self {
        match choice {
            ConnectivityChoice::Four => Connectivity::Four,
            ConnectivityChoice::Eight => Connectivity::Eight,
        }
    }
}

/// Noise injection and denoising chain run before segmentation
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PreprocessParams {
    #[serde(default = "default_preprocess_enabled")]
    pub enabled: bool,

    #[serde(default = "default_gamma_correction")]
    pub gamma_correction: f64,

    /// Probability that a pixel is replaced by salt or pepper
    #[serde(default = "default_noise_probability")]
    pub noise_probability: f64,

    #[serde(default = "default_noise_seed")]
    pub noise_seed: u64,

    /// Median window size (odd)
    #[serde(default = "default_median_kernel_size")]
    pub median_kernel_size: u32,

    #[serde(default = "default_median_passes")]
    pub median_passes: u32,

    #[serde(default = "default_gaussian_sigma")]
    pub gaussian_sigma: f32,

    /// Edge-preserving pass on the grayscale image after the blur
    #[serde(default = "default_bilateral_window")]
    pub bilateral_window: u32,

    #[serde(default = "default_bilateral_sigma_color")]
    pub bilateral_sigma_color: f32,

    #[serde(default = "default_bilateral_sigma_spatial")]
    pub bilateral_sigma_spatial: f32,
}

fn default_parallel() -> bool {
    true
}

fn default_contour_points() -> usize {
    400
}

fn default_alpha() -> f64 {
    0.015
}

fn default_beta() -> f64 {
    0.85
}

fn default_gamma() -> f64 {
    0.012
}

fn default_w_line() -> f64 {
    0.0
}

fn default_w_edge() -> f64 {
    1.0
}

fn default_max_iterations() -> usize {
    2500
}

fn default_convergence_threshold() -> f64 {
    0.1
}

fn default_smoothing_sigma() -> f64 {
    8.0
}

fn default_max_px_move() -> f64 {
    1.0
}

fn default_tolerance() -> f64 {
    0.05
}

fn default_fill_value() -> f32 {
    127.0 / 255.0
}

fn default_preprocess_enabled() -> bool {
    true
}

fn default_gamma_correction() -> f64 {
    0.09
}

fn default_noise_probability() -> f64 {
    0.3
}

fn default_noise_seed() -> u64 {
    42
}

fn default_median_kernel_size() -> u32 {
    9
}

fn default_median_passes() -> u32 {
    3
}

fn default_gaussian_sigma() -> f32 {
    1.7 // OpenCV's sigma for a 9x9 kernel
}

fn default_bilateral_window() -> u32 {
    9
}

fn default_bilateral_sigma_color() -> f32 {
    20.0
}

fn default_bilateral_sigma_spatial() -> f32 {
    100.0
}

impl Default for SnakeParams {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            beta: default_beta(),
            gamma: default_gamma(),
            w_line: default_w_line(),
            w_edge: default_w_edge(),
            max_iterations: default_max_iterations(),
            convergence_threshold: default_convergence_threshold(),
            boundary_mode: BoundaryMode::default(),
            smoothing_sigma: default_smoothing_sigma(),
            max_px_move: default_max_px_move(),
            use_parallel: default_parallel(),
        }
    }
}

impl Default for FloodParams {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            fill_value: default_fill_value(),
            connectivity: ConnectivityChoice::default(),
        }
    }
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            enabled: default_preprocess_enabled(),
            gamma_correction: default_gamma_correction(),
            noise_probability: default_noise_probability(),
            noise_seed: default_noise_seed(),
            median_kernel_size: default_median_kernel_size(),
            median_passes: default_median_passes(),
            gaussian_sigma: default_gaussian_sigma(),
            bilateral_window: default_bilateral_window(),
            bilateral_sigma_color: default_bilateral_sigma_color(),
            bilateral_sigma_spatial: default_bilateral_sigma_spatial(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: "./data/input".to_string(),
            output_base_dir: "./data/output".to_string(),
            use_parallel: default_parallel(),
            contour_points: default_contour_points(),
            crop: None,
            ground_truth_path: None,
            roi: None,
            snake: SnakeParams::default(),
            flood: FloodParams::default(),
            preprocess: PreprocessParams::default(),
        }
    }
}

impl SnakeParams {
    /// Range checks the engine runs before every evolution
    pub fn validate(&self) -> Result<()> {
        let positive = [("alpha", self.alpha), ("beta", self.beta), ("gamma", self.gamma)];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SnakeFusionError::invalid(format!(
                    "{} must be a finite value > 0, got {}",
                    name, value
                )));
            }
        }

        if !self.w_line.is_finite() || !self.w_edge.is_finite() {
            return Err(SnakeFusionError::invalid(
                "w_line and w_edge must be finite",
            ));
        }

        if self.max_iterations == 0 {
            return Err(SnakeFusionError::invalid("max_iterations must be > 0"));
        }

        if !self.convergence_threshold.is_finite() || self.convergence_threshold < 0.0 {
            return Err(SnakeFusionError::invalid(format!(
                "convergence_threshold must be >= 0, got {}",
                self.convergence_threshold
            )));
        }

        if !self.smoothing_sigma.is_finite() || self.smoothing_sigma < 0.0 {
            return Err(SnakeFusionError::invalid(format!(
                "smoothing_sigma must be >= 0, got {}",
                self.smoothing_sigma
            )));
        }

        if !self.max_px_move.is_finite() || self.max_px_move <= 0.0 {
            return Err(SnakeFusionError::invalid(format!(
                "max_px_move must be > 0, got {}",
                self.max_px_move
            )));
        }

        Ok(())
    }
}

impl FloodParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(SnakeFusionError::invalid(format!(
                "tolerance must be between 0.0 and 1.0, got {}",
                self.tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.fill_value) {
            return Err(SnakeFusionError::invalid(format!(
                "fill_value must be between 0.0 and 1.0, got {}",
                self.fill_value
            )));
        }
        Ok(())
    }
}

impl PreprocessParams {
    pub fn validate(&self) -> Result<()> {
        if !self.gamma_correction.is_finite() || self.gamma_correction <= 0.0 {
            return Err(SnakeFusionError::Config(
                "gamma_correction must be > 0.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.noise_probability) {
            return Err(SnakeFusionError::Config(
                "noise_probability must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.median_kernel_size == 0 || self.median_kernel_size % 2 == 0 {
            return Err(SnakeFusionError::Config(
                "median_kernel_size must be an odd number > 0".to_string(),
            ));
        }

        if !self.gaussian_sigma.is_finite() || self.gaussian_sigma <= 0.0 {
            return Err(SnakeFusionError::Config(
                "gaussian_sigma must be > 0.0".to_string(),
            ));
        }

        if self.bilateral_window == 0 || self.bilateral_window % 2 == 0 {
            return Err(SnakeFusionError::Config(
                "bilateral_window must be an odd number > 0".to_string(),
            ));
        }

        let sigmas = [self.bilateral_sigma_color, self.bilateral_sigma_spatial];
        if sigmas.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(SnakeFusionError::Config(
                "bilateral sigmas must be > 0.0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SnakeFusionError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|source| SnakeFusionError::ConfigLoad {
            source,
            path: path.to_path_buf(),
        })?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Check input path exists
        let input_path = PathBuf::from(&self.input_path);
        if !input_path.exists() {
            return Err(SnakeFusionError::InvalidPath(input_path));
        }

        if self.contour_points < 3 {
            return Err(SnakeFusionError::Config(
                "contour_points must be >= 3".to_string(),
            ));
        }

        if let Some([_, _, width, height]) = self.crop {
            if width == 0 || height == 0 {
                return Err(SnakeFusionError::Config(
                    "crop width and height must be > 0".to_string(),
                ));
            }
        }

        if let Some(roi) = &self.roi {
            if !roi.radius.is_finite() || roi.radius <= 0.0 {
                return Err(SnakeFusionError::Config(
                    "roi.radius must be > 0.0".to_string(),
                ));
            }
        }

        if let Some(ground_truth) = &self.ground_truth_path {
            let ground_truth = PathBuf::from(ground_truth);
            if !ground_truth.exists() {
                return Err(SnakeFusionError::InvalidPath(ground_truth));
            }
        }

        self.snake.validate()?;
        self.flood.validate()?;
        self.preprocess.validate()?;

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            SnakeFusionError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            input_path = "in"
            output_base_dir = "out"

            [snake]
            alpha = 0.5
            boundary_mode = "fixed"

            [flood]
            connectivity = "eight"
            "#,
        )
        .unwrap();

        assert_eq!(config.snake.alpha, 0.5);
        assert_eq!(config.snake.beta, 0.85);
        assert_eq!(config.snake.boundary_mode, BoundaryMode::Fixed);
        assert_eq!(config.flood.connectivity, ConnectivityChoice::Eight);
        assert_eq!(config.contour_points, 400);
        assert!(config.roi.is_none());
    }

    #[test]
    fn config_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.roi = Some(Roi { center_x: 12.0, center_y: 8.5, radius: 4.0 });
        config.crop = Some([1, 2, 30, 40]);
        config.snake.boundary_mode = BoundaryMode::FreeFixed;
        config.save_to_file(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn malformed_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "input_path = [").unwrap();

        match Config::from_file(&path) {
            Err(SnakeFusionError::ConfigLoad { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ConfigLoad error, got {:?}", other),
        }
    }

    #[test]
    fn snake_weights_must_be_positive() {
        let params = SnakeParams { beta: 0.0, ..SnakeParams::default() };
        assert!(matches!(params.validate(), Err(SnakeFusionError::InvalidInput(_))));

        let params = SnakeParams { gamma: f64::NAN, ..SnakeParams::default() };
        assert!(params.validate().is_err());

        assert!(SnakeParams::default().validate().is_ok());
    }

    #[test]
    fn tolerance_outside_unit_range_is_rejected() {
        let flood = FloodParams { tolerance: 1.5, ..FloodParams::default() };
        assert!(flood.validate().is_err());
        let flood = FloodParams { tolerance: -0.1, ..FloodParams::default() };
        assert!(flood.validate().is_err());
    }

    #[test]
    fn even_median_window_is_rejected() {
        let preprocess = PreprocessParams { median_kernel_size: 8, ..PreprocessParams::default() };
        assert!(preprocess.validate().is_err());
    }

    #[test]
    fn bilateral_settings_are_checked() {
        let parsed: PreprocessParams = toml::from_str("bilateral_sigma_color = 35.0").unwrap();
        assert_eq!(parsed.bilateral_window, 9);
        assert_eq!(parsed.bilateral_sigma_color, 35.0);
        assert_eq!(parsed.bilateral_sigma_spatial, 100.0);

        let even = PreprocessParams { bilateral_window: 4, ..PreprocessParams::default() };
        assert!(even.validate().is_err());
        let flat = PreprocessParams { bilateral_sigma_spatial: 0.0, ..PreprocessParams::default() };
        assert!(flat.validate().is_err());
    }

    #[test]
    fn roi_seed_rounds_centre() {
        let roi = Roi { center_x: 10.4, center_y: 20.6, radius: 3.0 };
        assert_eq!(roi.seed().unwrap(), Seed { row: 21, col: 10 });

        let roi = Roi { center_x: -4.0, center_y: 2.0, radius: 3.0 };
        assert!(roi.seed().is_err());
    }
}
