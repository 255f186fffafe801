// src/segmentation.rs
//
// Segmentation Adapter: runs a semantic-segmentation ONNX model (per-class
// logits out), reduces the logits to a dense class-id map, and turns each
// taxonomy class's regions into bounding-box obstacle records via external
// contours.

use crate::preprocessing::imagenet_normalize;
use crate::taxonomy::{self, TaxonomyEntry};
use crate::types::{BoundingBox, Frame, ObstacleRecord, SegmentationConfig, Source};
use anyhow::{ensure, Context, Result};
use ndarray::ArrayView4;
use opencv::{
    core::{Point, Vector},
    imgproc,
    prelude::*,
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info, warn};

/// Mapillary Vistas v1.2 semantic label names, indexed by class id. The
/// ONNX graph carries no label metadata, so the mapping lives here.
pub const MAPILLARY_VISTAS_LABELS: [&str; 65] = [
    "Bird",
    "Ground Animal",
    "Curb",
    "Fence",
    "Guard Rail",
    "Barrier",
    "Wall",
    "Bike Lane",
    "Crosswalk - Plain",
    "Curb Cut",
    "Parking",
    "Pedestrian Area",
    "Rail Track",
    "Road",
    "Service Lane",
    "Sidewalk",
    "Bridge",
    "Building",
    "Tunnel",
    "Person",
    "Bicyclist",
    "Motorcyclist",
    "Other Rider",
    "Lane Marking - Crosswalk",
    "Lane Marking - General",
    "Mountain",
    "Sand",
    "Sky",
    "Snow",
    "Terrain",
    "Vegetation",
    "Water",
    "Banner",
    "Bench",
    "Bike Rack",
    "Billboard",
    "Catch Basin",
    "CCTV Camera",
    "Fire Hydrant",
    "Junction Box",
    "Mailbox",
    "Manhole",
    "Phone Booth",
    "Pothole",
    "Street Light",
    "Pole",
    "Traffic Sign Frame",
    "Utility Pole",
    "Traffic Light",
    "Traffic Sign (Back)",
    "Traffic Sign (Front)",
    "Trash Can",
    "Bicycle",
    "Boat",
    "Bus",
    "Car",
    "Caravan",
    "Motorcycle",
    "On Rails",
    "Other Vehicle",
    "Trailer",
    "Truck",
    "Wheeled Slow",
    "Car Mount",
    "Ego Vehicle",
];

/// Segmentation Adapter. Same degraded-mode contract as the detector: a
/// model that failed to load makes `detect` return empty lists.
pub struct SegmentationDetector {
    session: Option<Session>,
    config: SegmentationConfig,
}

impl SegmentationDetector {
    pub fn new(config: &SegmentationConfig) -> Self {
        let session = match build_session(config) {
            Ok(session) => {
                info!("✓ Segmentation model initialized");
                Some(session)
            }
            Err(e) => {
                warn!("Segmentation model unavailable ({e:#}); segmentation output disabled");
                None
            }
        };
        Self {
            session,
            config: config.clone(),
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<ObstacleRecord>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };

        // 1. Resize + ImageNet normalize + CHW
        let input = imagenet_normalize(frame, self.config.input_width, self.config.input_height);

        // 2. Inference: per-class logits [1, C, h, w]
        let (shape, logits) = run_inference(session, &self.config, &input)?;
        ensure!(
            shape.len() == 4 && shape[0] == 1,
            "unexpected segmentation output shape {:?}",
            shape
        );
        let (classes, out_h, out_w) = (shape[1], shape[2], shape[3]);

        // 3. Per-pixel argmax, then nearest-neighbor upscale to frame size
        let class_map = argmax_class_map(&logits, classes, out_h, out_w)?;
        let class_map = resize_class_map_nearest(&class_map, out_w, out_h, frame.width, frame.height);

        // 4. Contours per taxonomy class
        let records =
            class_map_to_records(&class_map, frame.width, frame.height, classes, self.config.fixed_confidence)?;

        debug!("Segmentation produced {} obstacle records", records.len());
        Ok(records)
    }
}

fn build_session(config: &SegmentationConfig) -> Result<Session> {
    info!("Loading segmentation model: {}", config.model_path);

    let session = Session::builder()?
        .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.num_threads)?
        .commit_from_file(&config.model_path)
        .context("Failed to load segmentation model")?;

    Ok(session)
}

fn run_inference(
    session: &mut Session,
    config: &SegmentationConfig,
    input: &[f32],
) -> Result<(Vec<usize>, Vec<f32>)> {
    let shape = [1, 3, config.input_height, config.input_width];
    let input_value =
        ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

    let outputs = session
        .run(ort::inputs![config.input_name.as_str() => input_value])
        .context("Segmentation inference failed")?;
    let (out_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .context("Segmentation output is not an f32 tensor")?;

    let dims: Vec<usize> = out_shape.iter().map(|&d| d as usize).collect();
    Ok((dims, data.to_vec()))
}

/// Reduce `[1, C, h, w]` logits to a per-pixel class-id map.
fn argmax_class_map(logits: &[f32], classes: usize, height: usize, width: usize) -> Result<Vec<u16>> {
    let view = ArrayView4::from_shape((1, classes, height, width), logits)
        .context("segmentation logits do not match their declared shape")?;

    let mut map = vec![0u16; height * width];
    for y in 0..height {
        for x in 0..width {
            let mut best = 0usize;
            let mut best_score = view[[0, 0, y, x]];
            for c in 1..classes {
                let score = view[[0, c, y, x]];
                if score > best_score {
                    best_score = score;
                    best = c;
                }
            }
            map[y * width + x] = best as u16;
        }
    }
    Ok(map)
}

/// Nearest-neighbor resize of a class-id map (interpolating ids would
/// invent classes).
fn resize_class_map_nearest(
    map: &[u16],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u16> {
    let mut out = vec![0u16; dst_w * dst_h];
    for y in 0..dst_h {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        for x in 0..dst_w {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            out[y * dst_w + x] = map[sy * src_w + sx];
        }
    }
    out
}

/// Walk every class id the model can emit; ids whose label is in the
/// obstacle taxonomy get their regions extracted, everything else is
/// silently skipped.
fn class_map_to_records(
    class_map: &[u16],
    width: usize,
    height: usize,
    classes: usize,
    confidence: f32,
) -> Result<Vec<ObstacleRecord>> {
    let mut records = Vec::new();

    for (class_id, label) in MAPILLARY_VISTAS_LABELS.iter().enumerate() {
        if class_id >= classes {
            break;
        }
        let Some(entry) = taxonomy::segmentation_entry(label) else {
            continue;
        };

        let mask: Vec<u8> = class_map
            .iter()
            .map(|&id| if id as usize == class_id { 255 } else { 0 })
            .collect();
        if !mask.iter().any(|&v| v != 0) {
            continue;
        }

        records.extend(mask_to_records(&mask, width, height, entry, confidence)?);
    }

    Ok(records)
}

/// Extract external contours from a binary mask and convert each region
/// above the class's area threshold into an obstacle record.
fn mask_to_records(
    mask: &[u8],
    width: usize,
    height: usize,
    entry: &TaxonomyEntry,
    confidence: f32,
) -> Result<Vec<ObstacleRecord>> {
    let mat = Mat::from_slice(mask)?;
    let mat = mat.reshape(1, height as i32)?;

    let mut contours = Vector::<Vector<Point>>::new();
    imgproc::find_contours(
        &mat,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )?;

    let min_area = taxonomy::min_contour_area(entry.priority);
    let mut records = Vec::new();

    for i in 0..contours.len() {
        let contour = contours.get(i)?;
        let area = imgproc::contour_area(&contour, false)?;

        // Strict comparison: a region exactly at the threshold is dropped
        if area > min_area {
            let rect = imgproc::bounding_rect(&contour)?;
            let bbox = BoundingBox::new(rect.x, rect.y, rect.x + rect.width, rect.y + rect.height)
                .clamp_to_frame(width, height);

            records.push(ObstacleRecord {
                bbox,
                class_name: entry.class_name.to_string(),
                confidence,
                priority: entry.priority,
                source: Source::Segmentation,
                color: Some(entry.color),
            });
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, Priority};

    fn label_id(name: &str) -> u16 {
        MAPILLARY_VISTAS_LABELS
            .iter()
            .position(|&l| l == name)
            .unwrap() as u16
    }

    fn fill_rect(map: &mut [u16], width: usize, x: usize, y: usize, w: usize, h: usize, id: u16) {
        for yy in y..y + h {
            for xx in x..x + w {
                map[yy * width + xx] = id;
            }
        }
    }

    #[test]
    fn test_argmax_picks_strongest_class() {
        // 3 classes over a 1x2 map
        let logits = vec![
            0.1, 0.9, // class 0
            0.7, 0.2, // class 1
            0.3, 0.3, // class 2
        ];
        let map = argmax_class_map(&logits, 3, 1, 2).unwrap();
        assert_eq!(map, vec![1, 0]);
    }

    #[test]
    fn test_nearest_resize_keeps_ids() {
        let map = vec![1u16, 2, 3, 4]; // 2x2
        let out = resize_class_map_nearest(&map, 2, 2, 4, 4);
        assert_eq!(out[0], 1);
        assert_eq!(out[3], 2);
        assert_eq!(out[12], 3);
        assert_eq!(out[15], 4);
    }

    #[test]
    fn test_area_threshold_is_strict() {
        // find_contours on a filled w x h rectangle yields a contour of
        // polygon area (w-1)*(h-1). Critical threshold is 150.
        let entry = taxonomy::segmentation_entry("Manhole").unwrap();

        // 16x11 -> area exactly 150: excluded
        let mut mask = vec![0u8; 100 * 100];
        for y in 10..21 {
            for x in 10..26 {
                mask[y * 100 + x] = 255;
            }
        }
        let records = mask_to_records(&mask, 100, 100, entry, 0.95).unwrap();
        assert!(records.is_empty());

        // 16x12 -> area 165: included
        let mut mask = vec![0u8; 100 * 100];
        for y in 10..22 {
            for x in 10..26 {
                mask[y * 100 + x] = 255;
            }
        }
        let records = mask_to_records(&mask, 100, 100, entry, 0.95).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.class_name, "Manhole");
        assert_eq!(r.priority, Priority::Critical);
        assert_eq!(r.source, Source::Segmentation);
        assert_eq!(r.color, Some(Color::bgr(0, 0, 255)));
        assert!((r.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_class_map_skips_non_taxonomy_classes() {
        let mut map = vec![label_id("Road"); 200 * 200];
        // a big Sky region: valid class, not an obstacle
        fill_rect(&mut map, 200, 0, 0, 200, 40, label_id("Sky"));
        // a Manhole region large enough to pass the P1 threshold
        fill_rect(&mut map, 200, 50, 100, 40, 40, label_id("Manhole"));

        let records = class_map_to_records(&map, 200, 200, 65, 0.95).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].class_name, "Manhole");

        let b = records[0].bbox;
        assert_eq!((b.x1, b.y1), (50, 100));
        assert_eq!((b.x2, b.y2), (90, 140));
    }

    #[test]
    fn test_separate_regions_yield_separate_records() {
        let mut map = vec![label_id("Road"); 300 * 100];
        fill_rect(&mut map, 300, 10, 10, 30, 30, label_id("Bench"));
        fill_rect(&mut map, 300, 200, 10, 30, 30, label_id("Bench"));

        let records = class_map_to_records(&map, 300, 100, 65, 0.95).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.class_name == "Bench"));
        assert!(records.iter().all(|r| r.priority == Priority::Moderate));
    }
}
