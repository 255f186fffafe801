// src/fusion.rs
//
// Merges the detector's and the segmentation adapter's obstacle lists into
// a single prioritized list: priority-weighted greedy NMS, then a stable
// sort by priority.

use crate::types::{BoundingBox, ObstacleRecord};
use tracing::debug;

/// Suppression score: `confidence * (4 - priority)`. Weighting makes a P1
/// record outscore an equal-confidence P3 record 3:1 during suppression.
pub fn suppression_score(record: &ObstacleRecord) -> f32 {
    record.confidence * record.priority.nms_weight()
}

/// Box area with the inclusive-pixel-count convention.
fn area(b: &BoundingBox) -> f32 {
    ((b.x2 - b.x1 + 1) * (b.y2 - b.y1 + 1)) as f32
}

/// Intersection over Union, inclusive-pixel-count convention.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let xx1 = a.x1.max(b.x1);
    let yy1 = a.y1.max(b.y1);
    let xx2 = a.x2.min(b.x2);
    let yy2 = a.y2.min(b.y2);

    let w = (xx2 - xx1 + 1).max(0) as f32;
    let h = (yy2 - yy1 + 1).max(0) as f32;
    let inter = w * h;

    let union = area(a) + area(b) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression. Returns the indices of surviving boxes.
///
/// Boxes are visited by descending score (ties broken by input index, so
/// the result is deterministic); each kept box discards every remaining
/// box whose IoU with it exceeds `iou_threshold`.
pub fn nms_indices(boxes: &[BoundingBox], scores: &[f32], iou_threshold: f32) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());

    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for pos in 0..order.len() {
        let i = order[pos];
        if suppressed[i] {
            continue;
        }
        keep.push(i);

        for &j in &order[pos + 1..] {
            if !suppressed[j] && iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Merge both adapters' obstacle lists. Deterministic for identical inputs.
///
/// Survivors of the weighted NMS are restored to concatenation order
/// (detector entries first), then stably sorted ascending by priority, so
/// equal-priority ties keep detector records ahead of segmentation records.
pub fn merge_detections(
    detector: Vec<ObstacleRecord>,
    segmentation: Vec<ObstacleRecord>,
    iou_threshold: f32,
) -> Vec<ObstacleRecord> {
    let mut all = detector;
    all.extend(segmentation);

    if all.is_empty() {
        return all;
    }

    let boxes: Vec<BoundingBox> = all.iter().map(|o| o.bbox).collect();
    let scores: Vec<f32> = all.iter().map(suppression_score).collect();

    let keep = nms_indices(&boxes, &scores, iou_threshold);

    let mut kept = vec![false; all.len()];
    for &i in &keep {
        kept[i] = true;
    }

    let before = all.len();
    let mut merged: Vec<ObstacleRecord> = all
        .into_iter()
        .enumerate()
        .filter(|(i, _)| kept[*i])
        .map(|(_, o)| o)
        .collect();

    merged.sort_by_key(|o| o.priority);

    debug!("Merged {} detections into {}", before, merged.len());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, Source};

    fn record(
        bbox: [i32; 4],
        class_name: &str,
        confidence: f32,
        priority: Priority,
        source: Source,
    ) -> ObstacleRecord {
        ObstacleRecord {
            bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
            class_name: class_name.to_string(),
            confidence,
            priority,
            source,
            color: None,
        }
    }

    #[test]
    fn test_iou_inclusive_pixel_convention() {
        // [0,0,9,9] covers 10x10 = 100 pixels inclusively; [5,0,14,9]
        // overlaps 5 columns -> inter 50, union 150
        let a = BoundingBox::new(0, 0, 9, 9);
        let b = BoundingBox::new(5, 0, 14, 9);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);

        let far = BoundingBox::new(100, 100, 110, 110);
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_cluster() {
        let boxes = vec![
            BoundingBox::new(10, 10, 50, 50),
            BoundingBox::new(12, 12, 52, 52),
            BoundingBox::new(11, 9, 51, 49),
        ];
        let scores = vec![1.0, 2.5, 0.7];

        let keep = nms_indices(&boxes, &scores, 0.4);
        assert_eq!(keep, vec![1]);
    }

    #[test]
    fn test_nms_non_overlapping_all_survive() {
        let boxes = vec![
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(100, 100, 120, 120),
        ];
        let keep = nms_indices(&boxes, &[0.5, 0.9], 0.4);
        assert_eq!(keep, vec![1, 0]);
    }

    #[test]
    fn test_weighted_score_favors_critical() {
        let person = record(
            [10, 10, 50, 50],
            "person",
            0.9,
            Priority::Critical,
            Source::Detector,
        );
        let pole = record(
            [12, 12, 52, 52],
            "Pole",
            0.95,
            Priority::Important,
            Source::Segmentation,
        );
        // IoU between these two is well above 0.4
        assert!(iou(&person.bbox, &pole.bbox) > 0.4);
        // 0.9 * 3 = 2.7 vs 0.95 * 2 = 1.9
        assert!(suppression_score(&person) > suppression_score(&pole));

        let merged = merge_detections(vec![person], vec![pole], 0.4);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].class_name, "person");
        assert_eq!(merged[0].source, Source::Detector);
    }

    #[test]
    fn test_non_overlapping_sorted_by_priority() {
        let bench = record(
            [0, 0, 30, 30],
            "bench",
            0.8,
            Priority::Moderate,
            Source::Detector,
        );
        let manhole = record(
            [200, 200, 260, 260],
            "Manhole",
            0.95,
            Priority::Critical,
            Source::Segmentation,
        );

        let merged = merge_detections(vec![bench], vec![manhole], 0.4);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].class_name, "Manhole");
        assert_eq!(merged[1].class_name, "bench");
    }

    #[test]
    fn test_equal_priority_keeps_detector_first() {
        let car = record(
            [0, 0, 30, 30],
            "car",
            0.5,
            Priority::Important,
            Source::Detector,
        );
        let pole = record(
            [200, 0, 230, 30],
            "Pole",
            0.95,
            Priority::Important,
            Source::Segmentation,
        );

        // segmentation record has the higher score, but at equal priority
        // the concatenation order (detector first) must be preserved
        let merged = merge_detections(vec![car], vec![pole], 0.4);
        assert_eq!(merged[0].source, Source::Detector);
        assert_eq!(merged[1].source, Source::Segmentation);
    }

    #[test]
    fn test_empty_inputs_merge_to_empty() {
        let merged = merge_detections(Vec::new(), Vec::new(), 0.4);
        assert!(merged.is_empty());
    }

    #[test]
    fn test_merge_is_deterministic() {
        let det = vec![
            record(
                [10, 10, 50, 50],
                "person",
                0.9,
                Priority::Critical,
                Source::Detector,
            ),
            record(
                [60, 60, 90, 90],
                "bench",
                0.4,
                Priority::Moderate,
                Source::Detector,
            ),
        ];
        let seg = vec![record(
            [12, 12, 52, 52],
            "Pole",
            0.95,
            Priority::Important,
            Source::Segmentation,
        )];

        let a = merge_detections(det.clone(), seg.clone(), 0.4);
        let b = merge_detections(det, seg, 0.4);
        assert_eq!(a, b);
    }
}
