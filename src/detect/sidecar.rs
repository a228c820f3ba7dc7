//! Boxes exported by an external detector.
//!
//! Face, person and animal detection need trained models. Rather than link
//! one in, the pipeline can read boxes another tool already produced for a
//! photo. The sidecar is a JSON file:
//!
//! ```json
//! {
//!   "imagesize": { "width": 4000, "height": 3000 },
//!   "convention": "pixel_top_left",
//!   "detections": [
//!     { "box": [1000, 500, 1400, 900], "class": "face", "confidence": 0.93 },
//!     { "box": [2600, 520, 2980, 900], "class": "person", "confidence": 0.81 }
//!   ]
//! }
//! ```
//!
//! `box` is `[x_min, y_min, x_max, y_max]`. With `pixel_top_left` (the
//! default) it is measured in pixels of `imagesize`, and the detector rescales
//! it to whatever analysis image it is handed. With `normalized_bottom_left`
//! the values are fractions of the image with `y` measured from the bottom.

use super::{DetectError, NativeBox, SubjectDetector, SubjectKind};
use crate::geometry::Rect;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxConvention {
    #[default]
    PixelTopLeft,
    NormalizedBottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarDetection {
    #[serde(rename = "box")]
    pub bounding_box: [f64; 4],
    pub class: String,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

/// Parsed detections file for one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarFile {
    #[serde(default)]
    pub imagesize: Option<ImageSize>,
    #[serde(default)]
    pub convention: BoxConvention,
    #[serde(default)]
    pub detections: Vec<SidecarDetection>,
}

/// Detections below this confidence are ignored.
pub const MIN_CONFIDENCE: f64 = 0.25;

/// Map a detector class label onto a subject kind.
pub fn kind_for_class(class: &str) -> Option<SubjectKind> {
    match class.trim().to_ascii_lowercase().as_str() {
        "face" => Some(SubjectKind::Face),
        "person" | "human" | "body" => Some(SubjectKind::Human),
        "animal" | "cat" | "dog" | "bird" | "horse" | "sheep" | "cow" | "bear" => {
            Some(SubjectKind::Animal)
        }
        "saliency" | "salient" => Some(SubjectKind::Saliency),
        _ => None,
    }
}

impl SidecarFile {
    pub fn load(path: &Path) -> Result<Self, DetectError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(json: &str) -> Result<Self, DetectError> {
        Ok(serde_json::from_str(json)?)
    }

    /// One detector per kind that has at least one usable detection.
    pub fn detectors(self) -> Vec<Arc<dyn SubjectDetector>> {
        let shared = Arc::new(self);
        SubjectKind::ALL
            .into_iter()
            .filter(|kind| shared.entries(*kind).next().is_some())
            .map(|kind| {
                Arc::new(SidecarDetector {
                    kind,
                    file: Arc::clone(&shared),
                }) as Arc<dyn SubjectDetector>
            })
            .collect()
    }

    fn entries(&self, kind: SubjectKind) -> impl Iterator<Item = &SidecarDetection> {
        self.detections.iter().filter(move |d| {
            d.confidence >= MIN_CONFIDENCE && kind_for_class(&d.class) == Some(kind)
        })
    }

    fn native_boxes(
        &self,
        kind: SubjectKind,
        width: u32,
        height: u32,
    ) -> Result<Vec<NativeBox>, DetectError> {
        let mut out = Vec::new();
        for d in self.entries(kind) {
            let [x0, y0, x1, y1] = d.bounding_box;
            let native = match self.convention {
                BoxConvention::NormalizedBottomLeft => NativeBox::NormalizedBottomLeft {
                    x: x0,
                    y: y0,
                    width: x1 - x0,
                    height: y1 - y0,
                },
                BoxConvention::PixelTopLeft => {
                    let size = self.imagesize.ok_or_else(|| DetectError::Failed {
                        kind,
                        message: "pixel boxes need imagesize".into(),
                    })?;
                    let sx = width as f64 / size.width.max(1) as f64;
                    let sy = height as f64 / size.height.max(1) as f64;
                    NativeBox::PixelTopLeft(Rect::new(
                        x0 * sx,
                        y0 * sy,
                        (x1 - x0) * sx,
                        (y1 - y0) * sy,
                    ))
                }
            };
            out.push(native);
        }
        Ok(out)
    }
}

/// Reports one kind's boxes from a [`SidecarFile`].
#[derive(Debug, Clone)]
pub struct SidecarDetector {
    kind: SubjectKind,
    file: Arc<SidecarFile>,
}

impl SubjectDetector for SidecarDetector {
    fn kind(&self) -> SubjectKind {
        self.kind
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<NativeBox>, DetectError> {
        self.file
            .native_boxes(self.kind, image.width(), image.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "imagesize": { "width": 4000, "height": 3000 },
        "detections": [
            { "box": [1000, 500, 1400, 900], "class": "face", "confidence": 0.93 },
            { "box": [2600, 520, 2980, 900], "class": "Face" },
            { "box": [0, 0, 10, 10], "class": "person", "confidence": 0.1 },
            { "box": [0, 0, 10, 10], "class": "traffic light" }
        ]
    }"#;

    #[test]
    fn class_labels_map_to_kinds() {
        assert_eq!(kind_for_class("person"), Some(SubjectKind::Human));
        assert_eq!(kind_for_class(" DOG "), Some(SubjectKind::Animal));
        assert_eq!(kind_for_class("car"), None);
    }

    #[test]
    fn only_confident_known_kinds_get_detectors() {
        let file = SidecarFile::parse(SAMPLE).unwrap();
        let detectors = file.detectors();
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].kind(), SubjectKind::Face);
    }

    #[test]
    fn pixel_boxes_rescale_to_analysis_image() {
        let file = SidecarFile::parse(SAMPLE).unwrap();
        let detectors = file.detectors();
        let boxes = detectors[0].detect(&RgbImage::new(400, 300)).unwrap();
        assert_eq!(
            boxes[0],
            NativeBox::PixelTopLeft(Rect::new(100.0, 50.0, 40.0, 40.0))
        );
        assert_eq!(boxes.len(), 2);
    }

    #[test]
    fn normalized_boxes_pass_through() {
        let json = r#"{
            "convention": "normalized_bottom_left",
            "detections": [{ "box": [0.1, 0.2, 0.3, 0.6], "class": "cat" }]
        }"#;
        let detectors = SidecarFile::parse(json).unwrap().detectors();
        let boxes = detectors[0].detect(&RgbImage::new(10, 10)).unwrap();
        let NativeBox::NormalizedBottomLeft { x, y, width, height } = boxes[0] else {
            panic!("expected normalized box");
        };
        assert_eq!((x, y), (0.1, 0.2));
        assert!((width - 0.2).abs() < 1e-12 && (height - 0.4).abs() < 1e-12);
    }

    #[test]
    fn pixel_boxes_without_imagesize_fail() {
        let json = r#"{ "detections": [{ "box": [0, 0, 5, 5], "class": "face" }] }"#;
        let detectors = SidecarFile::parse(json).unwrap().detectors();
        assert!(matches!(
            detectors[0].detect(&RgbImage::new(10, 10)),
            Err(DetectError::Failed { .. })
        ));
    }

    #[test]
    fn load_reads_file_and_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("a.json");
        std::fs::write(&good, SAMPLE).unwrap();
        assert_eq!(SidecarFile::load(&good).unwrap().detections.len(), 4);

        let bad = tmp.path().join("b.json");
        std::fs::write(&bad, "{ nope").unwrap();
        assert!(matches!(SidecarFile::load(&bad), Err(DetectError::Json(_))));
        assert!(matches!(
            SidecarFile::load(&tmp.path().join("missing.json")),
            Err(DetectError::Io(_))
        ));
    }
}
