// src/export.rs

use crate::types::{ObstacleRecord, Priority};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// JSON metadata record accompanying an annotated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub image: String,
    pub total_obstacles: usize,
    pub by_priority: PriorityCounts,
    pub detections: Vec<DetectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub critical: usize,
    pub important: usize,
    pub moderate: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    #[serde(rename = "class")]
    pub class_name: String,
    pub bbox: [i32; 4],
    pub confidence: f32,
    pub priority: u8,
    pub source: String,
    /// RGB for display; internal colors are BGR and get converted here.
    pub color: [u8; 3],
}

/// Serialize the merged obstacle list into the output record shape.
pub fn build_report(image_filename: &str, obstacles: &[ObstacleRecord]) -> DetectionReport {
    let count = |p: Priority| obstacles.iter().filter(|o| o.priority == p).count();

    DetectionReport {
        image: format!("annotated_{}", image_filename),
        total_obstacles: obstacles.len(),
        by_priority: PriorityCounts {
            critical: count(Priority::Critical),
            important: count(Priority::Important),
            moderate: count(Priority::Moderate),
        },
        detections: obstacles
            .iter()
            .map(|o| DetectionEntry {
                class_name: o.class_name.clone(),
                bbox: o.bbox.as_array(),
                confidence: o.confidence,
                priority: o.priority.as_u8(),
                source: o.source.as_str().to_string(),
                color: o
                    .color
                    .unwrap_or_else(|| o.priority.default_color())
                    .to_rgb(),
            })
            .collect(),
    }
}

/// Write the report as pretty JSON named after the image stem.
pub fn write_report(
    report: &DetectionReport,
    json_dir: &Path,
    image_filename: &str,
) -> Result<PathBuf> {
    let stem = Path::new(image_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(image_filename);
    let path = json_dir.join(format!("{}.json", stem));

    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(path)
}
