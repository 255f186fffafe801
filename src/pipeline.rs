// src/pipeline.rs

use crate::fusion;
use crate::object_detection::ObstacleDetector;
use crate::segmentation::SegmentationDetector;
use crate::types::{Frame, ObstacleRecord};
use anyhow::Result;

/// Anything that turns a frame into obstacle records. Both model adapters
/// implement this; tests drive the pipeline with canned sources.
pub trait ObstacleSource {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObstacleRecord>>;
}

impl ObstacleSource for ObstacleDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObstacleRecord>> {
        ObstacleDetector::detect(self, frame)
    }
}

impl ObstacleSource for SegmentationDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<ObstacleRecord>> {
        SegmentationDetector::detect(self, frame)
    }
}

/// Full detection pipeline: detector, then segmentation, then fusion.
/// Sequential and request-scoped; an inference failure in either adapter
/// aborts the run (no partial results).
pub struct DetectionPipeline<D, S> {
    detector: D,
    segmentation: S,
    iou_threshold: f32,
}

impl<D: ObstacleSource, S: ObstacleSource> DetectionPipeline<D, S> {
    pub fn new(detector: D, segmentation: S, iou_threshold: f32) -> Self {
        Self {
            detector,
            segmentation,
            iou_threshold,
        }
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<ObstacleRecord>> {
        let detector_obstacles = self.detector.detect(frame)?;
        let segmentation_obstacles = self.segmentation.detect(frame)?;

        Ok(fusion::merge_detections(
            detector_obstacles,
            segmentation_obstacles,
            self.iou_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Priority, Source};
    use anyhow::bail;

    struct Canned(Vec<ObstacleRecord>);

    impl ObstacleSource for Canned {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObstacleRecord>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl ObstacleSource for Failing {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<ObstacleRecord>> {
            bail!("inference failed")
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4).unwrap()
    }

    fn record(bbox: [i32; 4], priority: Priority, source: Source) -> ObstacleRecord {
        ObstacleRecord {
            bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
            class_name: "person".to_string(),
            confidence: 0.9,
            priority,
            source,
            color: None,
        }
    }

    #[test]
    fn test_pipeline_merges_and_sorts() {
        let detector = Canned(vec![record(
            [0, 0, 30, 30],
            Priority::Moderate,
            Source::Detector,
        )]);
        let segmentation = Canned(vec![record(
            [100, 100, 160, 160],
            Priority::Critical,
            Source::Segmentation,
        )]);

        let mut pipeline = DetectionPipeline::new(detector, segmentation, 0.4);
        let merged = pipeline.detect(&frame()).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].priority, Priority::Critical);
        assert_eq!(merged[1].priority, Priority::Moderate);
    }

    #[test]
    fn test_pipeline_empty_sources_yield_empty_merge() {
        let mut pipeline = DetectionPipeline::new(Canned(Vec::new()), Canned(Vec::new()), 0.4);
        assert!(pipeline.detect(&frame()).unwrap().is_empty());
    }

    #[test]
    fn test_adapter_failure_aborts_the_run() {
        let segmentation = Canned(vec![record(
            [100, 100, 160, 160],
            Priority::Critical,
            Source::Segmentation,
        )]);
        let mut pipeline = DetectionPipeline::new(Failing, segmentation, 0.4);
        assert!(pipeline.detect(&frame()).is_err());
    }
}
