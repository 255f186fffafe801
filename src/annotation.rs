// src/annotation.rs

use crate::types::{Color, ObstacleRecord, Priority, Source};
use anyhow::Result;
use opencv::{
    core::{Point, Rect, Scalar},
    imgproc,
    prelude::*,
};

const LABEL_FONT_SCALE: f64 = 0.5;
const LABEL_FONT_THICKNESS: i32 = 2;

fn box_thickness(priority: Priority) -> i32 {
    match priority {
        Priority::Critical => 4,
        Priority::Important => 3,
        Priority::Moderate => 2,
    }
}

/// Tier and source tallies over the (post-merge, priority-sorted) list,
/// in iteration order. Shared by the summary panel.
fn count_by_tier_and_source(obstacles: &[ObstacleRecord]) -> ([usize; 3], [usize; 2]) {
    let mut tiers = [0usize; 3];
    let mut sources = [0usize; 2];
    for obs in obstacles {
        tiers[obs.priority.as_u8() as usize - 1] += 1;
        match obs.source {
            Source::Detector => sources[0] += 1,
            Source::Segmentation => sources[1] += 1,
        }
    }
    (tiers, sources)
}

/// Draw bounding boxes, label tags and the summary panel onto a copy of
/// the source image. The input is never mutated.
pub fn annotate(frame: &Mat, obstacles: &[ObstacleRecord]) -> Result<Mat> {
    let mut annotated = frame.try_clone()?;

    for obs in obstacles {
        let color = obs.color.unwrap_or_else(|| obs.priority.default_color());
        let b = obs.bbox;

        imgproc::rectangle(
            &mut annotated,
            Rect::new(b.x1, b.y1, b.x2 - b.x1, b.y2 - b.y1),
            color.to_scalar(),
            box_thickness(obs.priority),
            imgproc::LINE_8,
            0,
        )?;

        draw_label_tag(&mut annotated, obs, color)?;
    }

    let (tiers, sources) = count_by_tier_and_source(obstacles);
    draw_summary_panel(&mut annotated, &tiers, &sources)?;

    Ok(annotated)
}

/// Filled tag above the box's top-left corner: `"{class} P{priority}"`,
/// white text on the obstacle color.
fn draw_label_tag(annotated: &mut Mat, obs: &ObstacleRecord, color: Color) -> Result<()> {
    let text = format!("{} P{}", obs.class_name, obs.priority.as_u8());
    let b = obs.bbox;

    let mut baseline = 0;
    let text_size = imgproc::get_text_size(
        &text,
        imgproc::FONT_HERSHEY_SIMPLEX,
        LABEL_FONT_SCALE,
        LABEL_FONT_THICKNESS,
        &mut baseline,
    )?;

    imgproc::rectangle(
        annotated,
        Rect::new(
            b.x1,
            b.y1 - text_size.height - 10,
            text_size.width + 5,
            text_size.height + 10,
        ),
        color.to_scalar(),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        annotated,
        &text,
        Point::new(b.x1 + 2, b.y1 - 5),
        imgproc::FONT_HERSHEY_SIMPLEX,
        LABEL_FONT_SCALE,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        LABEL_FONT_THICKNESS,
        imgproc::LINE_8,
        false,
    )?;

    Ok(())
}

/// Opaque black panel in the top-left corner with per-tier counts (each
/// line in its tier color) and the per-source tally.
fn draw_summary_panel(annotated: &mut Mat, tiers: &[usize; 3], sources: &[usize; 2]) -> Result<()> {
    imgproc::rectangle(
        annotated,
        Rect::new(10, 10, 340, 140),
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;

    let lines = [
        (format!("Critical obstacles (P1): {}", tiers[0]), Priority::Critical),
        (format!("Important obstacles (P2): {}", tiers[1]), Priority::Important),
        (format!("Moderate obstacles (P3): {}", tiers[2]), Priority::Moderate),
    ];
    for (i, (text, priority)) in lines.iter().enumerate() {
        imgproc::put_text(
            annotated,
            text,
            Point::new(20, 30 + 30 * i as i32),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            priority.default_color().to_scalar(),
            2,
            imgproc::LINE_8,
            false,
        )?;
    }

    imgproc::put_text(
        annotated,
        &format!("Detector: {} | Segmentation: {}", sources[0], sources[1]),
        Point::new(20, 130),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;

    Ok(())
}
