use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use image::{ImageFormat, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;
use tracing::{info, warn, Level};

use polyseg_rs::config::RunMode;
use polyseg_rs::{io, Config, SeedSegmenter};

fn main() -> Result<()> {
    let config = Config::parse();

    let log_level = if config.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    ensure!(config.input.exists(), "Input image does not exist");
    ensure!(
        ImageFormat::from_extension(&config.format).is_some(),
        "Invalid format"
    );

    if let Some(num_threads) = config.num_threads {
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
    }

    let image = read_input(&config)?;
    let store = config
        .polygon_store(image.width(), image.height())
        .context("Invalid seed arguments")?;
    let seg_config = config
        .segmentation_config()
        .context("Invalid class colors")?;
    let palette = seg_config.palette.clone();
    let segmenter = SeedSegmenter::from_config(seg_config);

    let (mask, rejected) = if config.mode == RunMode::Overlay {
        segmenter.overlay(&image, &store)
    } else {
        let progress_bar = ProgressBar::new(0);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} classes ({eta})",
            )?
            .progress_chars("#>-"),
        );
        let output = segmenter
            .with_progress(progress_bar)
            .segment(&image, &store)
            .context("Segmentation failed")?;
        let failed = output.failed_classes().count();
        if failed > 0 {
            warn!("{} of {} classes produced no region", failed, output.classes.len());
        }
        (output.mask, output.rejected_polygons)
    };
    if !rejected.is_empty() {
        warn!("{} seed shapes were skipped", rejected.len());
    }

    let destination = output_path(&config.output, &config.format);
    if destination.extension().is_some_and(|ext| ext == "bin") {
        io::write_mask_bin(&destination, &mask, &palette)?;
    } else {
        let rendered = if config.blend {
            mask.blend_onto(&image, &palette)?
        } else {
            mask.to_rgba_image(&palette)
        };
        io::save_mask_image(&destination, &rendered, &config.format)
            .with_context(|| format!("Failed to save mask: {}", destination.display()))?;
    }

    info!("Mask written to {}", destination.display());
    Ok(())
}

fn read_input(config: &Config) -> Result<RgbImage> {
    if config.input.extension().is_some_and(|ext| ext == "bin") {
        let (Some(width), Some(height)) = (config.width, config.height) else {
            anyhow::bail!("Raw .bin input needs --width and --height");
        };
        return io::read_raw_image(&config.input, width, height)
            .with_context(|| format!("Failed to read raw image: {}", config.input.display()));
    }
    io::load_image(&config.input)
        .with_context(|| format!("Failed to open image: {}", config.input.display()))
}

fn output_path<P: AsRef<Path>>(path: P, format: &str) -> PathBuf {
    let path = path.as_ref();
    match path.extension() {
        Some(_) => path.to_path_buf(),
        None => path.with_extension(format),
    }
}
