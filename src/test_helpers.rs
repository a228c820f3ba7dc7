//! Shared test utilities for the smartframe test suite.
//!
//! Provides synthetic images and encoded photos, detectors with canned
//! results, an in-memory photo source, and a small pipeline rooted in a
//! temporary directory.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let pipeline = test_pipeline(tmp.path());
//! let spec = pipeline.prepare(&jpeg_bytes(640, 360)).unwrap();
//! ```

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{ImageFormat, Rgb, RgbImage};

use crate::detect::{DetectError, DetectorEnsemble, NativeBox, SubjectDetector, SubjectKind};
use crate::geometry::{PixelSize, Rect};
use crate::imaging::EncodeSettings;
use crate::imaging::encode::tag_orientation;
use crate::pipeline::{Pipeline, PipelineGate, PipelineSettings};
use crate::source::{PhotoSource, SourceError};
use crate::store::{FileStore, RefreshSignal};
use crate::types::SizeMap;

// =========================================================================
// Images
// =========================================================================

/// Red ramps left to right, green top to bottom.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.saturating_sub(1).max(1)) as u8;
        let g = (y * 255 / height.saturating_sub(1).max(1)) as u8;
        Rgb([r, g, 128])
    })
}

/// Deterministic full-range noise. Hard to compress, so it exercises the
/// encoder's byte budget.
pub fn noise_image(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 24) as u8
    };
    RgbImage::from_fn(width, height, |_, _| Rgb([next(), next(), next()]))
}

/// Flat gray frame with a black and white checkerboard inside `patch`.
pub fn checker_patch_image(width: u32, height: u32, patch: Rect) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f64, y as f64);
        let inside = fx >= patch.min_x() && fx < patch.max_x() && fy >= patch.min_y() && fy < patch.max_y();
        if !inside {
            return Rgb([128, 128, 128]);
        }
        if ((x / 4) + (y / 4)) % 2 == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb([255, 255, 255])
        }
    })
}

/// A gradient JPEG of the given size without EXIF.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    gradient_image(width, height)
        .write_to(&mut out, ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// [`jpeg_bytes`] carrying an EXIF Orientation tag.
pub fn jpeg_bytes_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
    tag_orientation(jpeg_bytes(width, height), orientation).unwrap()
}

// =========================================================================
// Detectors
// =========================================================================

/// Reports the same boxes for every image.
#[derive(Debug, Clone)]
pub struct FixedDetector {
    kind: SubjectKind,
    boxes: Vec<NativeBox>,
}

impl FixedDetector {
    /// Top-left pixel boxes in analysis-image space.
    pub fn pixels(kind: SubjectKind, rects: Vec<Rect>) -> Self {
        Self {
            kind,
            boxes: rects.into_iter().map(NativeBox::PixelTopLeft).collect(),
        }
    }
}

impl SubjectDetector for FixedDetector {
    fn kind(&self) -> SubjectKind {
        self.kind
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<NativeBox>, DetectError> {
        Ok(self.boxes.clone())
    }
}

/// Always fails with a hard error.
#[derive(Debug, Clone, Copy)]
pub struct FailingDetector(pub SubjectKind);

impl SubjectDetector for FailingDetector {
    fn kind(&self) -> SubjectKind {
        self.0
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<NativeBox>, DetectError> {
        Err(DetectError::Failed {
            kind: self.0,
            message: "model crashed".into(),
        })
    }
}

// =========================================================================
// Pipeline and collaborators
// =========================================================================

/// A pipeline with small targets, storing into `<root>/data`.
///
/// Analysis images are at most 320 px, masters 400 px.
pub fn test_pipeline(root: &Path) -> Pipeline {
    let store = FileStore::open(root.join("data")).unwrap();
    let settings = PipelineSettings {
        analysis_max_edge: 320,
        master_max_edge: 400,
        targets: SizeMap {
            small: PixelSize::new(60, 60),
            medium: PixelSize::new(128, 60),
            large: PixelSize::new(128, 134),
        },
        master_encode: EncodeSettings::new(0.88, 2_500_000),
        render_encode: SizeMap::from_fn(|_| EncodeSettings::new(0.85, 450_000)),
        manual_encode: EncodeSettings::new(0.92, 1_800_000),
    };
    Pipeline::new(
        settings,
        store,
        DetectorEnsemble::builtin(),
        Arc::new(PipelineGate::new(2)),
    )
}

/// Photos held in memory, listed in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    photos: Vec<(String, Vec<u8>)>,
}

impl MemorySource {
    pub fn new(photos: Vec<(&str, Vec<u8>)>) -> Self {
        Self {
            photos: photos
                .into_iter()
                .map(|(id, bytes)| (id.to_string(), bytes))
                .collect(),
        }
    }
}

impl PhotoSource for MemorySource {
    fn source_id(&self) -> String {
        "memory".to_string()
    }

    fn list(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.photos.iter().map(|(id, _)| id.clone()).collect())
    }

    fn fetch(&self, id: &str) -> Result<Vec<u8>, SourceError> {
        self.photos
            .iter()
            .find(|(pid, _)| pid == id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

/// Counts refresh requests.
#[derive(Debug, Default)]
pub struct CountingRefresh(AtomicUsize);

impl CountingRefresh {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl RefreshSignal for CountingRefresh {
    fn refresh(&self, _reason: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
