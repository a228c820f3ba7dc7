//! Subject detection: a set of independent detectors combined into one
//! ranked result.
//!
//! Each [`SubjectDetector`] reports boxes for a single [`SubjectKind`] in its
//! own native convention ([`NativeBox`]). The [`DetectorEnsemble`] converts
//! every box to top-left pixel space of the analysis image, clamps it to the
//! image, ranks each kind by size and centrality, and chooses which kind the
//! crop planner should frame.
//!
//! Detectors fail closed: an error is logged and that detector contributes no
//! boxes. Detection never aborts a pipeline run.
//!
//! | Detector | Kinds | Backend |
//! |---|---|---|
//! | [`SaliencyDetector`] | saliency | Canny edge density on a grid (`imageproc`) |
//! | [`SidecarDetector`] | any | JSON exported by an external detector |
//! | [`UnavailableDetector`] | any | none, always errors |

pub mod saliency;
pub mod sidecar;

use crate::geometry::Rect;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use saliency::SaliencyDetector;
pub use sidecar::{SidecarDetector, SidecarFile};

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("no {0} detector available")]
    Unavailable(SubjectKind),
    #[error("{kind} detection failed: {message}")]
    Failed { kind: SubjectKind, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid detections file: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a detection box contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Face,
    Human,
    Animal,
    Saliency,
}

impl SubjectKind {
    pub const ALL: [SubjectKind; 4] = [
        SubjectKind::Face,
        SubjectKind::Human,
        SubjectKind::Animal,
        SubjectKind::Saliency,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SubjectKind::Face => "face",
            SubjectKind::Human => "human",
            SubjectKind::Animal => "animal",
            SubjectKind::Saliency => "saliency",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A box as a detector reports it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeBox {
    /// Fractions of the image with the origin at the bottom-left corner
    /// (`y` is the distance of the box's bottom edge from the image bottom).
    NormalizedBottomLeft {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Pixels of the analysis image with the origin at the top-left corner.
    PixelTopLeft(Rect),
}

impl NativeBox {
    /// Convert to top-left pixels of a `width`×`height` image.
    ///
    /// The result is clamped to the image; boxes that end up empty (or were
    /// not finite) return `None`.
    pub fn to_top_left(&self, width: f64, height: f64) -> Option<Rect> {
        let rect = match *self {
            NativeBox::NormalizedBottomLeft {
                x,
                y,
                width: bw,
                height: bh,
            } => {
                let max_y = y + bh;
                Rect::new(x * width, (1.0 - max_y) * height, bw * width, bh * height)
            }
            NativeBox::PixelTopLeft(rect) => rect,
        };
        if !(rect.x.is_finite()
            && rect.y.is_finite()
            && rect.width.is_finite()
            && rect.height.is_finite())
        {
            return None;
        }
        let clamped = rect.intersection(&Rect::from_size(width, height));
        if clamped.is_empty() { None } else { Some(clamped) }
    }
}

/// Finds subjects of one kind.
pub trait SubjectDetector: Send + Sync {
    fn kind(&self) -> SubjectKind;
    fn detect(&self, image: &RgbImage) -> Result<Vec<NativeBox>, DetectError>;
}

/// Placeholder for a kind with no detection backend. Always errors.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableDetector(pub SubjectKind);

impl SubjectDetector for UnavailableDetector {
    fn kind(&self) -> SubjectKind {
        self.0
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<NativeBox>, DetectError> {
        Err(DetectError::Unavailable(self.0))
    }
}

/// Ranked boxes (top-left analysis pixels) for each kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedBoxes {
    pub face: Vec<Rect>,
    pub human: Vec<Rect>,
    pub animal: Vec<Rect>,
    pub saliency: Vec<Rect>,
}

impl RankedBoxes {
    pub fn get(&self, kind: SubjectKind) -> &[Rect] {
        match kind {
            SubjectKind::Face => &self.face,
            SubjectKind::Human => &self.human,
            SubjectKind::Animal => &self.animal,
            SubjectKind::Saliency => &self.saliency,
        }
    }

    fn get_mut(&mut self, kind: SubjectKind) -> &mut Vec<Rect> {
        match kind {
            SubjectKind::Face => &mut self.face,
            SubjectKind::Human => &mut self.human,
            SubjectKind::Animal => &mut self.animal,
            SubjectKind::Saliency => &mut self.saliency,
        }
    }
}

/// Outcome of running the ensemble on one analysis image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectDetection {
    /// Kind the planner should frame, `None` when nothing was found.
    pub kind: Option<SubjectKind>,
    /// Ranked boxes of the chosen kind.
    pub boxes: Vec<Rect>,
    /// Ranked boxes of every kind, used by the pairing heuristic.
    pub ranked: RankedBoxes,
    /// Kinds whose detector returned a hard failure (not "unavailable").
    pub failed: Vec<SubjectKind>,
}

impl SubjectDetection {
    /// A detection with nothing found.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a detection from ranked boxes, choosing the kind.
    pub fn from_ranked(ranked: RankedBoxes) -> Self {
        let kind = choose_kind(&ranked);
        let boxes = kind.map(|k| ranked.get(k).to_vec()).unwrap_or_default();
        Self {
            kind,
            boxes,
            ranked,
            failed: Vec::new(),
        }
    }

    pub fn count(&self, kind: SubjectKind) -> usize {
        self.ranked.get(kind).len()
    }
}

/// A set of detectors run together.
///
/// Cheap to clone: detectors are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct DetectorEnsemble {
    detectors: Vec<Arc<dyn SubjectDetector>>,
}

impl fmt::Debug for DetectorEnsemble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<SubjectKind> = self.detectors.iter().map(|d| d.kind()).collect();
        f.debug_struct("DetectorEnsemble").field("kinds", &kinds).finish()
    }
}

impl DetectorEnsemble {
    pub fn new(detectors: Vec<Arc<dyn SubjectDetector>>) -> Self {
        Self { detectors }
    }

    /// Saliency from edge density; faces, humans and animals have no
    /// built-in backend.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(UnavailableDetector(SubjectKind::Face)),
            Arc::new(UnavailableDetector(SubjectKind::Human)),
            Arc::new(UnavailableDetector(SubjectKind::Animal)),
            Arc::new(SaliencyDetector::default()),
        ])
    }

    /// This ensemble plus `extra`. Extra detectors of a kind that was only
    /// covered by an [`UnavailableDetector`] simply add their boxes.
    pub fn extended(&self, extra: Vec<Arc<dyn SubjectDetector>>) -> Self {
        let mut detectors = self.detectors.clone();
        detectors.extend(extra);
        Self { detectors }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector and combine the results.
    pub fn detect(&self, image: &RgbImage) -> SubjectDetection {
        let (w, h) = (image.width() as f64, image.height() as f64);
        let mut ranked = RankedBoxes::default();
        let mut failed = Vec::new();

        for detector in &self.detectors {
            let kind = detector.kind();
            match detector.detect(image) {
                Ok(native) => {
                    let boxes = native.iter().filter_map(|b| b.to_top_left(w, h));
                    ranked.get_mut(kind).extend(boxes);
                }
                Err(DetectError::Unavailable(_)) => {
                    debug!(%kind, "detector unavailable");
                }
                Err(e) => {
                    warn!(%kind, error = %e, "detector failed, continuing without it");
                    failed.push(kind);
                }
            }
        }

        for kind in SubjectKind::ALL {
            let boxes = std::mem::take(ranked.get_mut(kind));
            *ranked.get_mut(kind) = rank_boxes(boxes, w, h);
        }

        let mut detection = SubjectDetection::from_ranked(ranked);
        detection.failed = failed;
        debug!(
            kind = ?detection.kind,
            faces = detection.ranked.face.len(),
            humans = detection.ranked.human.len(),
            animals = detection.ranked.animal.len(),
            saliency = detection.ranked.saliency.len(),
            "subjects detected"
        );
        detection
    }
}

/// Order boxes by area (largest first), breaking near-ties by distance of
/// the box centre from the image centre.
///
/// Two areas are tied when they differ by at most `max(64, 1%)` of the
/// larger one.
pub fn rank_boxes(boxes: Vec<Rect>, width: f64, height: f64) -> Vec<Rect> {
    let (cx, cy) = (width / 2.0, height / 2.0);
    let dist2 = |r: &Rect| {
        let dx = r.mid_x() - cx;
        let dy = r.mid_y() - cy;
        dx * dx + dy * dy
    };
    let before = |a: &Rect, b: &Rect| {
        let (aa, ba) = (a.area(), b.area());
        let tolerance = 64f64.max(0.01 * aa.max(ba));
        if (aa - ba).abs() <= tolerance {
            dist2(a) < dist2(b)
        } else {
            aa > ba
        }
    };
    // The tie band is not transitive, so `sort_by` is not safe here.
    let mut ranked: Vec<Rect> = Vec::with_capacity(boxes.len());
    for b in boxes {
        let pos = ranked
            .iter()
            .position(|r| before(&b, r))
            .unwrap_or(ranked.len());
        ranked.insert(pos, b);
    }
    ranked
}

/// Decide which kind of subject to frame.
///
/// Several faces win outright. A single face defers to a group of humans or
/// to several salient regions, since framing one face would crop the rest
/// out. Without faces, animals beat humans beat saliency.
pub fn choose_kind(ranked: &RankedBoxes) -> Option<SubjectKind> {
    let faces = ranked.face.len();
    if faces >= 2 {
        return Some(SubjectKind::Face);
    }
    if faces == 1 {
        if ranked.human.len() >= 2 {
            return Some(SubjectKind::Human);
        }
        if ranked.saliency.len() >= 2 {
            return Some(SubjectKind::Saliency);
        }
        return Some(SubjectKind::Face);
    }
    [SubjectKind::Animal, SubjectKind::Human, SubjectKind::Saliency]
        .into_iter()
        .find(|k| !ranked.get(*k).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingDetector, FixedDetector};

    fn r(x: f64, y: f64, w: f64, h: f64) -> Rect {
        Rect::new(x, y, w, h)
    }

    #[test]
    fn bottom_left_boxes_flip_to_top_left() {
        let b = NativeBox::NormalizedBottomLeft {
            x: 0.25,
            y: 0.5,
            width: 0.5,
            height: 0.25,
        };
        // maxY = 0.75 from the bottom -> 0.25 from the top.
        assert_eq!(b.to_top_left(400.0, 200.0), Some(r(100.0, 50.0, 200.0, 50.0)));
    }

    #[test]
    fn boxes_are_clamped_and_empties_dropped() {
        let b = NativeBox::PixelTopLeft(r(-10.0, -10.0, 30.0, 30.0));
        assert_eq!(b.to_top_left(100.0, 100.0), Some(r(0.0, 0.0, 20.0, 20.0)));
        let outside = NativeBox::PixelTopLeft(r(200.0, 200.0, 10.0, 10.0));
        assert_eq!(outside.to_top_left(100.0, 100.0), None);
        let nan = NativeBox::PixelTopLeft(r(f64::NAN, 0.0, 10.0, 10.0));
        assert_eq!(nan.to_top_left(100.0, 100.0), None);
    }

    #[test]
    fn ranking_prefers_area_then_centre() {
        let big = r(0.0, 0.0, 100.0, 100.0);
        let small_centre = r(45.0, 45.0, 10.0, 10.0);
        let small_corner = r(0.0, 0.0, 10.0, 12.0);
        let ranked = rank_boxes(vec![small_corner, small_centre, big], 100.0, 100.0);
        // 100 vs 120 area is within the 64px tie band, so centrality decides.
        assert_eq!(ranked, vec![big, small_centre, small_corner]);
    }

    #[test]
    fn choose_kind_rules() {
        let one = vec![r(0.0, 0.0, 10.0, 10.0)];
        let two = vec![r(0.0, 0.0, 10.0, 10.0), r(20.0, 0.0, 10.0, 10.0)];

        let faces2 = RankedBoxes { face: two.clone(), ..Default::default() };
        assert_eq!(choose_kind(&faces2), Some(SubjectKind::Face));

        let face_crowd = RankedBoxes { face: one.clone(), human: two.clone(), ..Default::default() };
        assert_eq!(choose_kind(&face_crowd), Some(SubjectKind::Human));

        let face_salient = RankedBoxes { face: one.clone(), saliency: two.clone(), ..Default::default() };
        assert_eq!(choose_kind(&face_salient), Some(SubjectKind::Saliency));

        let lone_face = RankedBoxes { face: one.clone(), human: one.clone(), ..Default::default() };
        assert_eq!(choose_kind(&lone_face), Some(SubjectKind::Face));

        let animal_human = RankedBoxes { animal: one.clone(), human: one.clone(), ..Default::default() };
        assert_eq!(choose_kind(&animal_human), Some(SubjectKind::Animal));

        assert_eq!(choose_kind(&RankedBoxes::default()), None);
    }

    #[test]
    fn failing_detector_does_not_abort() {
        let ensemble = DetectorEnsemble::new(vec![
            Arc::new(FailingDetector(SubjectKind::Face)),
            Arc::new(FixedDetector::pixels(SubjectKind::Animal, vec![r(10.0, 10.0, 20.0, 20.0)])),
        ]);
        let image = RgbImage::new(100, 100);
        let detection = ensemble.detect(&image);
        assert_eq!(detection.kind, Some(SubjectKind::Animal));
        assert_eq!(detection.boxes.len(), 1);
        assert_eq!(detection.failed, vec![SubjectKind::Face]);
    }

    #[test]
    fn unavailable_detectors_are_not_failures() {
        let ensemble = DetectorEnsemble::new(vec![Arc::new(UnavailableDetector(SubjectKind::Face))]);
        let detection = ensemble.detect(&RgbImage::new(10, 10));
        assert_eq!(detection, SubjectDetection::none());
    }

    #[test]
    fn extended_adds_detectors() {
        let base = DetectorEnsemble::builtin();
        let more = base.extended(vec![Arc::new(FixedDetector::pixels(SubjectKind::Face, vec![]))]);
        assert_eq!(more.len(), base.len() + 1);
    }
}
