//! CLI output formatting.
//!
//! Output is **information-first**: each entity (photo spec, shuffle entry)
//! gets a header line with its identity, and indented context lines for
//! files, crops and state. The same crop formatting is used everywhere so a
//! plan, a prepared spec and a shuffle entry can be compared by eye.
//!
//! # Output Format
//!
//! ## Prepare / regenerate
//!
//! ```text
//! Photo smart-photo-….json
//!     Master: smart-master-….jpg
//!     small 510x510 → smart-small-….jpg
//!         Crop: x 0.219 y 0.000 w 0.563 h 1.000
//!     medium 1092x510 → smart-manual-….jpg
//!         Crop: x 0.000 y 0.120 w 1.000 h 0.700
//!         Manual: straighten 3.0°, 1 turn
//! ```
//!
//! ## Plan
//!
//! ```text
//! Subjects
//!     Chosen: face (2 boxes)
//!     face 2, human 0, animal 0, saliency 3
//! Crops
//!     small: x 0.219 y 0.000 w 0.563 h 1.000
//! ```
//!
//! ## Shuffle status
//!
//! ```text
//! Shuffle smart-shuffle-….json (source dir-3f2a…)
//!     Rotation: 1h, next change 2026-01-06 14:00 UTC
//!     Progress: 4/5 prepared, 1 failed
//! → 001 trip/beach.jpg (score 1.42)
//!   002 trip/dinner.jpg (score 0.80) [blurry]
//!   003 trip/broken.jpg failed
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function returning `Vec<String>` for
//! testability and a `print_*` wrapper that writes to stdout.

use crate::detect::{SubjectDetection, SubjectKind};
use crate::geometry::{NormalizedRect, PixelSize};
use crate::manifest::{ShuffleEntry, ShuffleManifest, rotation_label};
use crate::shuffle::{BatchOutcome, DriveSummary};
use crate::types::{ManualOverride, SizeMap, SmartPhotoSpec};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `x 0.250 y 0.000 w 0.500 h 1.000`
fn crop_line(crop: &NormalizedRect) -> String {
    format!(
        "x {:.3} y {:.3} w {:.3} h {:.3}",
        crop.x, crop.y, crop.width, crop.height
    )
}

fn manual_details(manual: &ManualOverride) -> String {
    let mut parts = Vec::new();
    if let Some(deg) = manual.straighten_degrees {
        parts.push(format!("straighten {deg:.1}°"));
    }
    match manual.rotation_quarter_turns {
        Some(1) => parts.push("1 turn".to_string()),
        Some(n) => parts.push(format!("{n} turns")),
        None => {}
    }
    if parts.is_empty() {
        "crop only".to_string()
    } else {
        parts.join(", ")
    }
}

// ============================================================================
// Specs
// ============================================================================

/// Format a prepared photo spec stored as `name`.
pub fn format_spec_output(spec: &SmartPhotoSpec, name: &str) -> Vec<String> {
    let mut lines = vec![format!("Photo {name}")];
    lines.push(format!("{}Master: {}", indent(1), spec.master_file));
    for (size, variant) in spec.variants.iter() {
        lines.push(format!(
            "{}{} {} → {}",
            indent(1),
            size,
            variant.pixel_size,
            variant.effective_file()
        ));
        lines.push(format!(
            "{}Crop: {}",
            indent(2),
            crop_line(&variant.effective_crop())
        ));
        if let Some(manual) = &variant.manual {
            lines.push(format!("{}Manual: {}", indent(2), manual_details(manual)));
        }
    }
    if let Some(manifest) = &spec.shuffle_manifest {
        lines.push(format!("{}Shuffle: {}", indent(1), manifest));
    }
    lines
}

pub fn print_spec_output(spec: &SmartPhotoSpec, name: &str) {
    for line in format_spec_output(spec, name) {
        println!("{}", line);
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Format a dry-run plan: detection summary and the crop for each size.
pub fn format_plan_output(
    detection: &SubjectDetection,
    crops: &SizeMap<NormalizedRect>,
    analysis: PixelSize,
) -> Vec<String> {
    let mut lines = vec![format!("Subjects (analysis {analysis})")];
    match detection.kind {
        Some(kind) => lines.push(format!(
            "{}Chosen: {} ({} {})",
            indent(1),
            kind,
            detection.boxes.len(),
            if detection.boxes.len() == 1 { "box" } else { "boxes" }
        )),
        None => lines.push(format!("{}Chosen: none (centred crops)", indent(1))),
    }
    let counts: Vec<String> = SubjectKind::ALL
        .iter()
        .map(|k| format!("{} {}", k, detection.count(*k)))
        .collect();
    lines.push(format!("{}{}", indent(1), counts.join(", ")));
    if !detection.failed.is_empty() {
        let failed: Vec<&str> = detection.failed.iter().map(|k| k.name()).collect();
        lines.push(format!("{}Failed: {}", indent(1), failed.join(", ")));
    }
    lines.push("Crops".to_string());
    for (size, crop) in crops.iter() {
        lines.push(format!("{}{}: {}", indent(1), size, crop_line(crop)));
    }
    lines
}

pub fn print_plan_output(
    detection: &SubjectDetection,
    crops: &SizeMap<NormalizedRect>,
    analysis: PixelSize,
) {
    for line in format_plan_output(detection, crops, analysis) {
        println!("{}", line);
    }
}

// ============================================================================
// Shuffle
// ============================================================================

fn entry_line(position: usize, entry: &ShuffleEntry, current: bool) -> String {
    let marker = if current { "→ " } else { "  " };
    let mut line = format!("{marker}{} {}", format_index(position), entry.id);
    if entry.is_prepared() {
        if let Some(score) = entry.score {
            line.push_str(&format!(" (score {score:.2})"));
        }
    } else if entry.is_failed() {
        line.push_str(" failed");
    } else {
        line.push_str(" pending");
    }
    let notes: Vec<&str> = entry
        .flags
        .iter()
        .map(String::as_str)
        .filter(|f| *f != crate::manifest::FAILED_FLAG)
        .collect();
    if !notes.is_empty() {
        line.push_str(&format!(" [{}]", notes.join(", ")));
    }
    line
}

/// Format the status of one shuffle manifest.
pub fn format_shuffle_status(manifest: &ShuffleManifest, name: &str) -> Vec<String> {
    let progress = manifest.progress();
    let mut lines = vec![format!("Shuffle {name} (source {})", manifest.source_id)];
    let rotation = match manifest.next_change_at {
        Some(at) => format!(
            "{}, next change {}",
            rotation_label(manifest.rotation_interval_minutes),
            at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => rotation_label(manifest.rotation_interval_minutes),
    };
    lines.push(format!("{}Rotation: {}", indent(1), rotation));
    lines.push(format!(
        "{}Progress: {}/{} prepared, {} failed",
        indent(1),
        progress.prepared,
        progress.total,
        progress.failed
    ));
    for (i, entry) in manifest.entries.iter().enumerate() {
        lines.push(entry_line(i + 1, entry, i == manifest.current_index));
    }
    lines
}

pub fn print_shuffle_status(manifest: &ShuffleManifest, name: &str) {
    for line in format_shuffle_status(manifest, name) {
        println!("{}", line);
    }
}

/// One-line summary of a batch.
pub fn format_batch_outcome(outcome: &BatchOutcome) -> String {
    if !outcome.updated {
        return "Skipped: another batch is already preparing this album.".to_string();
    }
    format!(
        "Prepared {} photo(s), {} failed.",
        outcome.prepared, outcome.failed
    )
}

/// One-line summary of a driver run.
pub fn format_drive_summary(summary: &DriveSummary) -> String {
    format!(
        "Ran {} batch(es): prepared {}, failed {}.",
        summary.batches, summary.prepared, summary.failed
    )
}
