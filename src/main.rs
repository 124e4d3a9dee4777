use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info, warn};
use rayon::prelude::*;

use snake_fusion_lib::config::{Config, Roi};
use snake_fusion_lib::image_io::{get_png_files_in_dir, load_image};
use snake_fusion_lib::pipeline::{ensure_output_directories, process_image};

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "SnakeFusionR - Active contour and region fusion segmentation")]
struct Args {
    /// Path to input file or directory
    #[clap(short, long)]
    input: Option<String>,

    /// Path to output directory
    #[clap(short, long)]
    output: Option<String>,

    /// Path to configuration file (defaults are used if it does not exist)
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Ground-truth mask file or directory of masks (overwrites config)
    #[clap(short, long)]
    ground_truth: Option<String>,

    /// Region of interest as centre x, centre y and radius (overwrites config)
    #[clap(long, num_args = 3, value_names = ["X", "Y", "R"])]
    roi: Option<Vec<f64>>,

    /// Skip noise injection and denoising
    #[clap(long)]
    no_preprocess: bool,

    /// Enable debug mode (save intermediate images and log more)
    #[clap(short, long)]
    debug: bool,
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Config::from_file(path).with_context(|| format!("loading {}", path.display()))
    } else {
        warn!("Config file {} not found, using defaults", path.display());
        Ok(Config::default())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut config = load_config(Path::new(&args.config))?;

    // Override config with command-line arguments
    if let Some(input) = args.input {
        config.input_path = input;
    }
    if let Some(output) = args.output {
        config.output_base_dir = output;
    }
    if let Some(ground_truth) = args.ground_truth {
        config.ground_truth_path = Some(ground_truth);
    }
    if let Some(roi) = args.roi.as_deref() {
        if let [center_x, center_y, radius] = *roi {
            config.roi = Some(Roi { center_x, center_y, radius });
        }
    }
    if args.no_preprocess {
        config.preprocess.enabled = false;
    }

    config.validate().context("invalid configuration")?;

    let start_time = Instant::now();
    ensure_output_directories(&config.output_base_dir)?;

    let input_path = PathBuf::from(&config.input_path);

    if input_path.is_file() {
        info!("Processing single file: {}", input_path.display());
        let input_image = load_image(&input_path)?;
        process_image(input_image, &config, args.debug)
            .with_context(|| format!("processing {}", input_path.display()))?;
    } else if input_path.is_dir() {
        info!("Processing directory: {}", input_path.display());
        let png_files = get_png_files_in_dir(&input_path)?;
        info!("Found {} PNG files", png_files.len());

        let run_one = |path: &PathBuf| {
            let outcome = load_image(path).and_then(|input| process_image(input, &config, args.debug));
            if let Err(e) = &outcome {
                error!("Error processing {}: {}", path.display(), e);
            }
            outcome.is_ok()
        };

        let succeeded = if config.use_parallel {
            png_files.par_iter().filter(|path| run_one(*path)).count()
        } else {
            png_files.iter().filter(|path| run_one(*path)).count()
        };

        let failed = png_files.len() - succeeded;
        info!("{} of {} images segmented", succeeded, png_files.len());
        if failed > 0 {
            bail!("{} images failed", failed);
        }
    } else {
        bail!("input path {} does not exist", input_path.display());
    }

    info!("Processing completed in {:.2} seconds", start_time.elapsed().as_secs_f64());

    Ok(())
}
