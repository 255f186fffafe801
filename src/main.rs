// src/main.rs

mod annotation;
mod config;
mod export;
mod fusion;
mod object_detection;
mod pipeline;
mod preprocessing;
mod segmentation;
mod taxonomy;
mod types;

use anyhow::{bail, ensure, Context, Result};
use export::DetectionReport;
use opencv::{core::Vector, imgcodecs, prelude::*};
use pipeline::{DetectionPipeline, ObstacleSource};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use types::{Config, Frame};
use walkdir::WalkDir;

#[derive(Default)]
struct RunStats {
    processed: usize,
    failed: usize,
    critical: usize,
    important: usize,
    moderate: usize,
}

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.filter.clone())
        .init();

    info!("Obstacle detection starting");

    let detector = object_detection::ObstacleDetector::new(&config.detector);
    let segmentation = segmentation::SegmentationDetector::new(&config.segmentation);
    let mut pipeline = DetectionPipeline::new(detector, segmentation, config.fusion.iou_threshold);

    let images = find_image_files(&config.io.input_dir)?;
    if images.is_empty() {
        error!("No images found in {}", config.io.input_dir);
        return Ok(());
    }
    info!("Found {} image(s) to process", images.len());

    fs::create_dir_all(&config.io.annotated_dir)?;
    fs::create_dir_all(&config.io.json_dir)?;

    let mut stats = RunStats::default();

    for (idx, image_path) in images.iter().enumerate() {
        info!(
            "Processing image {}/{}: {}",
            idx + 1,
            images.len(),
            image_path.display()
        );

        match process_image(image_path, &mut pipeline, &config) {
            Ok(report) => {
                info!(
                    "  {} obstacle(s): {} critical, {} important, {} moderate",
                    report.total_obstacles,
                    report.by_priority.critical,
                    report.by_priority.important,
                    report.by_priority.moderate
                );
                stats.processed += 1;
                stats.critical += report.by_priority.critical;
                stats.important += report.by_priority.important;
                stats.moderate += report.by_priority.moderate;
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", image_path.display(), e);
                stats.failed += 1;
            }
        }
    }

    info!("✓ Run complete");
    info!(
        "  Images: {} processed, {} failed",
        stats.processed, stats.failed
    );
    info!(
        "  Obstacles: {} critical, {} important, {} moderate",
        stats.critical, stats.important, stats.moderate
    );

    Ok(())
}

fn find_image_files(input_dir: &str) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    let image_extensions = vec!["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if image_extensions.contains(&ext.to_str().unwrap_or("")) {
                images.push(path.to_path_buf());
            }
        }
    }

    images.sort();
    info!("Found {} image files", images.len());
    Ok(images)
}

/// Run one image through the full pipeline: validate, detect, annotate,
/// write the annotated copy and the JSON report.
fn process_image<D: ObstacleSource, S: ObstacleSource>(
    image_path: &Path,
    pipeline: &mut DetectionPipeline<D, S>,
    config: &Config,
) -> Result<DetectionReport> {
    let filename = image_path
        .file_name()
        .and_then(|f| f.to_str())
        .context("image path has no valid filename")?;

    // Input validation happens before the pipeline: an unreadable file is
    // not a detection failure
    let mat = imgcodecs::imread(
        image_path.to_str().context("non-UTF8 image path")?,
        imgcodecs::IMREAD_COLOR,
    )?;
    if mat.rows() == 0 || mat.cols() == 0 {
        bail!("unreadable or undecodable image");
    }
    let frame = Frame::from_bgr_mat(&mat)?;

    let obstacles = pipeline.detect(&frame)?;

    let annotated = annotation::annotate(&mat, &obstacles)?;
    let annotated_path =
        Path::new(&config.io.annotated_dir).join(format!("annotated_{}", filename));
    write_annotated(&annotated_path, &annotated, filename)?;

    let report = export::build_report(filename, &obstacles);
    export::write_report(&report, Path::new(&config.io.json_dir), filename)?;

    Ok(report)
}

/// Output format mirrors the source extension: JPEG at quality 90 for
/// .jpg/.jpeg sources, lossless otherwise.
fn write_annotated(path: &Path, image: &Mat, source_filename: &str) -> Result<()> {
    let lower = source_filename.to_lowercase();
    let params: Vector<i32> = if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, 90])
    } else {
        Vector::new()
    };

    let written = imgcodecs::imwrite(
        path.to_str().context("non-UTF8 output path")?,
        image,
        &params,
    )?;
    ensure!(written, "Failed to write {}", path.display());

    Ok(())
}
