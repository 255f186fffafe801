// src/types.rs

use anyhow::{ensure, Result};
use opencv::{core::Scalar, imgproc, prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detector: DetectorConfig,
    pub segmentation: SegmentationConfig,
    pub fusion: FusionConfig,
    pub io: IoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model_path: String,
    pub input_size: usize,
    pub input_name: String,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub model_path: String,
    pub input_width: usize,
    pub input_height: usize,
    pub input_name: String,
    pub fixed_confidence: f32,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    pub input_dir: String,
    pub annotated_dir: String,
    pub json_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

/// Decoded image buffer handed to the model adapters.
///
/// Pixel data is RGB, row-major HWC. The BGR frames OpenCV decodes are
/// converted exactly once, in [`Frame::from_bgr_mat`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize) -> Result<Self> {
        ensure!(
            data.len() == width * height * 3,
            "frame buffer size {} does not match {}x{}x3",
            data.len(),
            width,
            height
        );
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Convert a BGR `Mat` (as produced by `imgcodecs::imread`) into an RGB frame.
    pub fn from_bgr_mat(mat: &Mat) -> Result<Self> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let width = rgb.cols() as usize;
        let height = rgb.rows() as usize;
        ensure!(width > 0 && height > 0, "empty image");

        Self::new(rgb.data_bytes()?.to_vec(), width, height)
    }
}

/// Danger tier of an obstacle, 1 = most critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Critical = 1,
    Important = 2,
    Moderate = 3,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Suppression weight used by the fusion NMS: `4 - priority`.
    ///
    /// A P1 record scores 3x the weight of an equal-confidence P3 record,
    /// so the more dangerous obstacle survives an overlap.
    pub fn nms_weight(self) -> f32 {
        (4 - self as u8) as f32
    }

    /// Default box color when a record carries none (detector output).
    pub fn default_color(self) -> Color {
        match self {
            Priority::Critical => Color::bgr(0, 0, 255),    // red
            Priority::Important => Color::bgr(0, 165, 255), // orange
            Priority::Moderate => Color::bgr(0, 255, 255),  // yellow
        }
    }
}

/// Which model adapter produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Detector,
    Segmentation,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Detector => "detector",
            Source::Segmentation => "segmentation",
        }
    }
}

/// Internal color type. Channel order is BGR, the order the drawing code
/// operates in; [`Color::to_rgb`] is the single conversion point for export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub b: u8,
    pub g: u8,
    pub r: u8,
}

impl Color {
    pub const fn bgr(b: u8, g: u8, r: u8) -> Self {
        Self { b, g, r }
    }

    pub fn to_scalar(self) -> Scalar {
        Scalar::new(self.b as f64, self.g as f64, self.r as f64, 0.0)
    }

    pub fn to_rgb(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

/// Axis-aligned box in integer pixel coordinates. Invariant: `x1 < x2`,
/// `y1 < y2`, coordinates within the frame that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Clamp to frame bounds while preserving `x1 < x2`, `y1 < y2`.
    pub fn clamp_to_frame(self, width: usize, height: usize) -> Self {
        let max_x = (width as i32 - 1).max(1);
        let max_y = (height as i32 - 1).max(1);
        let x1 = self.x1.clamp(0, max_x - 1);
        let y1 = self.y1.clamp(0, max_y - 1);
        let x2 = self.x2.clamp(x1 + 1, max_x);
        let y2 = self.y2.clamp(y1 + 1, max_y);
        Self { x1, y1, x2, y2 }
    }

    pub fn as_array(self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Normalized detection emitted by either model adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleRecord {
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
    pub priority: Priority,
    pub source: Source,
    /// Taxonomy color for segmentation records; detector records carry none
    /// and fall back to the priority default at the consuming end.
    pub color: Option<Color>,
}
