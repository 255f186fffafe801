// src/object_detection.rs

use crate::fusion;
use crate::preprocessing::{letterbox, Letterbox};
use crate::taxonomy;
use crate::types::{BoundingBox, DetectorConfig, Frame, ObstacleRecord, Source};
use anyhow::{Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info, warn};

/// COCO class names in model output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

// YOLOv8 output rows per anchor: cx, cy, w, h + one score per class
const YOLO_ATTRS: usize = 4 + COCO_CLASSES.len();

/// Detector Adapter: wraps the YOLOv8 ONNX model and normalizes its raw
/// detections into obstacle records.
///
/// A model that failed to load at startup leaves the adapter in degraded
/// mode: `detect` returns an empty list instead of failing the request.
pub struct ObstacleDetector {
    session: Option<Session>,
    config: DetectorConfig,
}

impl ObstacleDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        let session = match build_session(config) {
            Ok(session) => {
                info!("✓ Obstacle detector initialized");
                Some(session)
            }
            Err(e) => {
                warn!("Detector model unavailable ({e:#}); detector output disabled");
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

        // 1. Letterbox + normalize
        let (input, lb) = letterbox(frame, self.config.input_size);

        // 2. Inference
        let output = run_inference(session, &self.config, &input)?;

        // 3. Decode + filter + NMS
        let records = decode_detections(
            &output,
            &lb,
            frame.width,
            frame.height,
            self.config.confidence_threshold,
            self.config.nms_iou_threshold,
        );

        debug!("Detector produced {} obstacle records", records.len());
        Ok(records)
    }
}

fn build_session(config: &DetectorConfig) -> Result<Session> {
    info!("Loading detector model: {}", config.model_path);

    let session = Session::builder()?
        .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(config.num_threads)?
        .commit_from_file(&config.model_path)
        .context("Failed to load detector model")?;

    Ok(session)
}

fn run_inference(session: &mut Session, config: &DetectorConfig, input: &[f32]) -> Result<Vec<f32>> {
    let size = config.input_size;
    let shape = [1, 3, size, size];
    let input_value =
        ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

    let outputs = session
        .run(ort::inputs![config.input_name.as_str() => input_value])
        .context("Detector inference failed")?;
    let (_, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .context("Detector output is not an f32 tensor")?;

    Ok(data.to_vec())
}

/// Parse the `[1, 84, N]` YOLOv8 output: per anchor keep the best class,
/// drop anything outside the obstacle allow-list or at/below the confidence
/// threshold, reverse the letterbox transform, clamp, then suppress
/// duplicates with plain-confidence NMS (raw YOLO output is pre-NMS).
fn decode_detections(
    output: &[f32],
    lb: &Letterbox,
    frame_width: usize,
    frame_height: usize,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
) -> Vec<ObstacleRecord> {
    let anchors = output.len() / YOLO_ATTRS;
    let mut records = Vec::new();

    for i in 0..anchors {
        let mut max_conf = 0.0f32;
        let mut best_class = 0usize;
        for c in 0..COCO_CLASSES.len() {
            let conf = output[anchors * (4 + c) + i];
            if conf > max_conf {
                max_conf = conf;
                best_class = c;
            }
        }

        if max_conf <= confidence_threshold {
            continue;
        }
        let class_name = COCO_CLASSES[best_class];
        let Some(priority) = taxonomy::detector_priority(class_name) else {
            continue;
        };

        // Center format -> corner format, then back to frame coordinates
        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[anchors * 2 + i];
        let h = output[anchors * 3 + i];
        let corners = lb.to_frame_coords([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);

        let bbox = BoundingBox::new(
            corners[0] as i32,
            corners[1] as i32,
            corners[2] as i32,
            corners[3] as i32,
        )
        .clamp_to_frame(frame_width, frame_height);

        records.push(ObstacleRecord {
            bbox,
            class_name: class_name.to_string(),
            confidence: max_conf,
            priority,
            source: Source::Detector,
            color: None,
        });
    }

    let boxes: Vec<BoundingBox> = records.iter().map(|r| r.bbox).collect();
    let scores: Vec<f32> = records.iter().map(|r| r.confidence).collect();
    let keep = fusion::nms_indices(&boxes, &scores, nms_iou_threshold);

    let mut kept = vec![false; records.len()];
    for &i in &keep {
        kept[i] = true;
    }

    records
        .into_iter()
        .enumerate()
        .filter(|(i, _)| kept[*i])
        .map(|(_, r)| r)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    fn class_index(name: &str) -> usize {
        COCO_CLASSES.iter().position(|&c| c == name).unwrap()
    }

    fn synthetic_output(anchors: usize) -> Vec<f32> {
        vec![0.0; YOLO_ATTRS * anchors]
    }

    fn set_detection(
        output: &mut [f32],
        anchors: usize,
        i: usize,
        center: [f32; 4],
        class_name: &str,
        confidence: f32,
    ) {
        output[i] = center[0];
        output[anchors + i] = center[1];
        output[anchors * 2 + i] = center[2];
        output[anchors * 3 + i] = center[3];
        output[anchors * (4 + class_index(class_name)) + i] = confidence;
    }

    #[test]
    fn test_decode_filters_class_and_confidence() {
        let anchors = 4;
        let mut output = synthetic_output(anchors);
        // kept: allow-listed, above threshold
        set_detection(&mut output, anchors, 0, [100.0, 100.0, 40.0, 40.0], "person", 0.9);
        // dropped: not in the obstacle allow-list
        set_detection(&mut output, anchors, 1, [300.0, 300.0, 40.0, 40.0], "airplane", 0.99);
        // dropped: at the threshold (strict comparison)
        set_detection(&mut output, anchors, 2, [500.0, 100.0, 40.0, 40.0], "person", 0.3);
        // anchor 3 stays all-zero

        let records = decode_detections(&output, &IDENTITY, 640, 640, 0.3, 0.45);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].class_name, "person");
        assert_eq!(records[0].priority, Priority::Critical);
        assert_eq!(records[0].source, Source::Detector);
        assert_eq!(records[0].color, None);
        assert_eq!(records[0].bbox, BoundingBox::new(80, 80, 120, 120));
    }

    #[test]
    fn test_decode_suppresses_duplicate_boxes() {
        let anchors = 2;
        let mut output = synthetic_output(anchors);
        set_detection(&mut output, anchors, 0, [100.0, 100.0, 40.0, 40.0], "person", 0.8);
        set_detection(&mut output, anchors, 1, [102.0, 102.0, 40.0, 40.0], "person", 0.9);

        let records = decode_detections(&output, &IDENTITY, 640, 640, 0.3, 0.45);
        assert_eq!(records.len(), 1);
        assert!((records[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_reverses_letterbox_and_clamps() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 80.0,
        };
        let anchors = 1;
        let mut output = synthetic_output(anchors);
        // model-space box hanging over the left frame edge
        set_detection(&mut output, anchors, 0, [10.0, 400.0, 60.0, 100.0], "person", 0.9);

        let records = decode_detections(&output, &lb, 320, 240, 0.3, 0.45);
        assert_eq!(records.len(), 1);
        let b = records[0].bbox;
        assert_eq!(b.x1, 0); // clamped from -10
        assert!(b.x1 < b.x2 && b.y1 < b.y2);
        assert!(b.x2 <= 319 && b.y2 <= 239);
    }
}
