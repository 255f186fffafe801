// src/taxonomy.rs
//
// Static obstacle taxonomy. Two independent tables by design: the detector
// and the segmentation model partition the world differently, so each keeps
// its own class -> priority mapping.

use crate::types::{Color, Priority};

/// Taxonomy entry for a segmentation class.
#[derive(Debug, Clone, Copy)]
pub struct TaxonomyEntry {
    pub class_name: &'static str,
    pub priority: Priority,
    pub color: Color,
}

const fn entry(class_name: &'static str, priority: Priority, color: Color) -> TaxonomyEntry {
    TaxonomyEntry {
        class_name,
        priority,
        color,
    }
}

/// Segmentation classes treated as pedestrian-path obstacles (Mapillary
/// Vistas label names), with display color in BGR.
pub const SEGMENTATION_OBSTACLES: &[TaxonomyEntry] = &[
    // Critical surface hazards
    entry("Manhole", Priority::Critical, Color::bgr(0, 0, 255)),
    entry("Curb", Priority::Critical, Color::bgr(0, 0, 255)),
    entry("Curb Cut", Priority::Critical, Color::bgr(0, 0, 255)),
    // Vertical obstacles
    entry("Pole", Priority::Important, Color::bgr(0, 165, 255)),
    entry("Utility Pole", Priority::Important, Color::bgr(0, 165, 255)),
    entry("Street Light", Priority::Important, Color::bgr(0, 165, 255)),
    entry(
        "Traffic Light - General (Upright)",
        Priority::Important,
        Color::bgr(0, 165, 255),
    ),
    entry(
        "Traffic Light - Pedestrians",
        Priority::Important,
        Color::bgr(0, 165, 255),
    ),
    // Vegetation
    entry("Vegetation", Priority::Important, Color::bgr(0, 200, 100)),
    // Signage
    entry(
        "Traffic Sign (Front)",
        Priority::Important,
        Color::bgr(255, 165, 0),
    ),
    entry(
        "Traffic Sign (Back)",
        Priority::Important,
        Color::bgr(255, 165, 0),
    ),
    entry(
        "Traffic Sign - Direction (Front)",
        Priority::Important,
        Color::bgr(255, 165, 0),
    ),
    // Ground clutter
    entry("Fire Hydrant", Priority::Moderate, Color::bgr(0, 255, 255)),
    entry("Bench", Priority::Moderate, Color::bgr(0, 255, 255)),
    entry("Bike Rack", Priority::Moderate, Color::bgr(0, 255, 255)),
    entry("Billboard", Priority::Moderate, Color::bgr(0, 255, 255)),
    // Barriers
    entry("Fence", Priority::Important, Color::bgr(0, 165, 255)),
    entry("Guard Rail", Priority::Important, Color::bgr(0, 165, 255)),
    entry("Wall", Priority::Important, Color::bgr(0, 165, 255)),
];

/// Detector (COCO) classes accepted as obstacles and their assigned
/// priority. Independent from the segmentation table: `person` is the one
/// dynamic critical obstacle here, while the segmentation side reserves P1
/// for static fall hazards.
pub const DETECTOR_OBSTACLES: &[(&str, Priority)] = &[
    ("person", Priority::Critical),
    ("bicycle", Priority::Important),
    ("car", Priority::Important),
    ("motorcycle", Priority::Important),
    ("bus", Priority::Important),
    ("truck", Priority::Important),
    ("traffic light", Priority::Important),
    ("fire hydrant", Priority::Important),
    ("stop sign", Priority::Important),
    ("bench", Priority::Moderate),
    ("chair", Priority::Moderate),
    ("potted plant", Priority::Moderate),
    ("backpack", Priority::Moderate),
    ("handbag", Priority::Moderate),
    ("suitcase", Priority::Moderate),
];

/// Look up a segmentation class by label; `None` means not an obstacle.
pub fn segmentation_entry(class_name: &str) -> Option<&'static TaxonomyEntry> {
    SEGMENTATION_OBSTACLES
        .iter()
        .find(|e| e.class_name == class_name)
}

/// Look up the priority a detector class is assigned; `None` means the
/// class is not obstacle-relevant and the detection is dropped.
pub fn detector_priority(class_name: &str) -> Option<Priority> {
    DETECTOR_OBSTACLES
        .iter()
        .find(|(name, _)| *name == class_name)
        .map(|(_, p)| *p)
}

/// Minimum contour area (pixels) a segmentation region must EXCEED to be
/// kept, per priority tier.
pub fn min_contour_area(priority: Priority) -> f64 {
    match priority {
        Priority::Critical => 150.0,
        Priority::Important => 300.0,
        Priority::Moderate => 250.0,
    }
}
