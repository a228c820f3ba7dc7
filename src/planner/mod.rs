//! Crop planning: where in a photo each widget size should look.
//!
//! The planner is a pure function of the widget size, its target pixels, the
//! detection result and the analysis image size. It works in analysis pixels
//! and returns a [`NormalizedRect`], so the same crop can later be cut from
//! the much larger master.
//!
//! ## Per-size tuning
//!
//! | | small | medium | large |
//! |---|---|---|---|
//! | subjects framed | best pair, else top 1 | top 2 | all |
//! | box padding face/human/animal/saliency | .35/.30/.22/.16 | .30/.26/.20/.14 | .30/.26/.20/.14 |
//! | minimum padding (of shorter image side) | 0.02 | 0.015 | 0.015 |
//! | union safety scale | 1.20 | 1.15 | 1.10 |
//! | extra headroom | 1.06 | 1.04 | 1.02 |
//! | minimum crop side (of image side) | 0.38 | 0.40 | 0.55 |
//! | face / human upward bias | .12 / .10 | .08 / .07 | .05 / .05 |
//!
//! When the constraints conflict, containment of the subjects wins and the
//! minimum sizes are met only as far as the image allows.

pub mod pairing;

use crate::detect::{SubjectDetection, SubjectKind};
use crate::geometry::{NormalizedRect, PixelSize, Rect};
use crate::types::WidgetSize;

pub use pairing::{PairChoice, pick_pair_for_small};

/// Small widget crops never cover more than this share of the image when a
/// smaller crop still contains the subjects.
const SMALL_MAX_AREA_FRACTION: f64 = 0.75;

/// Tuning constants for one widget size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeTuning {
    pub min_padding_fraction: f64,
    pub safety_scale: f64,
    pub headroom: f64,
    pub min_dimension_fraction: f64,
}

impl SizeTuning {
    pub fn for_size(size: WidgetSize) -> Self {
        match size {
            WidgetSize::Small => Self {
                min_padding_fraction: 0.02,
                safety_scale: 1.20,
                headroom: 1.06,
                min_dimension_fraction: 0.38,
            },
            WidgetSize::Medium => Self {
                min_padding_fraction: 0.015,
                safety_scale: 1.15,
                headroom: 1.04,
                min_dimension_fraction: 0.40,
            },
            WidgetSize::Large => Self {
                min_padding_fraction: 0.015,
                safety_scale: 1.10,
                headroom: 1.02,
                min_dimension_fraction: 0.55,
            },
        }
    }
}

/// Padding added on each side of a box, as a fraction of the box.
pub fn kind_padding(kind: SubjectKind, size: WidgetSize) -> f64 {
    let small = size == WidgetSize::Small;
    match kind {
        SubjectKind::Face => if small { 0.35 } else { 0.30 },
        SubjectKind::Human => if small { 0.30 } else { 0.26 },
        SubjectKind::Animal => if small { 0.22 } else { 0.20 },
        SubjectKind::Saliency => if small { 0.16 } else { 0.14 },
    }
}

/// Upward shift of the crop centre, as a fraction of the subject height.
pub fn upward_bias(kind: SubjectKind, size: WidgetSize) -> f64 {
    match (kind, size) {
        (SubjectKind::Face, WidgetSize::Small) => 0.12,
        (SubjectKind::Face, WidgetSize::Medium) => 0.08,
        (SubjectKind::Face, WidgetSize::Large) => 0.05,
        (SubjectKind::Human, WidgetSize::Small) => 0.10,
        (SubjectKind::Human, WidgetSize::Medium) => 0.07,
        (SubjectKind::Human, WidgetSize::Large) => 0.05,
        _ => 0.0,
    }
}

/// Plan the crop for one widget size.
///
/// # Arguments
/// * `size` - Widget size family
/// * `target` - Output pixels; only the aspect ratio matters here
/// * `detection` - Ensemble result for the analysis image
/// * `analysis` - Analysis image dimensions the detection boxes refer to
///
/// # Returns
/// A normalised rectangle with the target's aspect ratio (as far as the image
/// allows) that satisfies the [`NormalizedRect`] invariant.
pub fn plan_crop(
    size: WidgetSize,
    target: PixelSize,
    detection: &SubjectDetection,
    analysis: PixelSize,
) -> NormalizedRect {
    let aspect = target.width as f64 / target.height.max(1) as f64;
    let (w, h) = (analysis.width as f64, analysis.height as f64);
    let crop = match detection.kind {
        Some(kind) if !detection.boxes.is_empty() => {
            subject_crop(size, aspect, detection, kind, w, h)
        }
        _ => centred_crop(w, h, aspect),
    };
    NormalizedRect::from_pixels(&crop, w, h)
}

/// Largest `aspect` rectangle centred in a `width`×`height` image.
pub fn centred_crop(width: f64, height: f64, aspect: f64) -> Rect {
    if width <= 0.0 || height <= 0.0 {
        return Rect::new(0.0, 0.0, 1.0, 1.0);
    }
    let (cw, ch) = if width / height > aspect {
        (height * aspect, height)
    } else {
        (width, width / aspect)
    };
    Rect::new((width - cw) / 2.0, (height - ch) / 2.0, cw, ch)
}

/// Grow a subject box by its kind's padding, with a floor tied to the image.
pub fn expand_subject_box(rect: &Rect, kind: SubjectKind, size: WidgetSize, width: f64, height: f64) -> Rect {
    let pad = kind_padding(kind, size);
    let mut expanded = rect.inset(-rect.width * pad, -rect.height * pad);

    let min_pad = width.min(height) * SizeTuning::for_size(size).min_padding_fraction;
    let min_w = rect.width + 2.0 * min_pad;
    if expanded.width < min_w {
        expanded = expanded.inset(-(min_w - expanded.width) / 2.0, 0.0);
    }
    let min_h = rect.height + 2.0 * min_pad;
    if expanded.height < min_h {
        expanded = expanded.inset(0.0, -(min_h - expanded.height) / 2.0);
    }
    expanded
}

/// Width/height pair kept at `aspect` while adjusting one side.
#[derive(Debug, Clone, Copy)]
struct Dims {
    w: f64,
    h: f64,
}

impl Dims {
    fn raise_to(mut self, min_w: f64, min_h: f64, aspect: f64) -> Self {
        if self.w < min_w {
            self.w = min_w;
            self.h = self.w / aspect;
        }
        if self.h < min_h {
            self.h = min_h;
            self.w = self.h * aspect;
        }
        self
    }

    fn cap_to(mut self, max_w: f64, max_h: f64, aspect: f64) -> Self {
        if self.w > max_w {
            self.w = max_w;
            self.h = self.w / aspect;
        }
        if self.h > max_h {
            self.h = max_h;
            self.w = self.h * aspect;
        }
        self
    }
}

fn subject_crop(
    size: WidgetSize,
    aspect: f64,
    detection: &SubjectDetection,
    chosen: SubjectKind,
    width: f64,
    height: f64,
) -> Rect {
    let bounds = Rect::from_size(width, height);
    let tuning = SizeTuning::for_size(size);

    let (selected, kind): (Vec<Rect>, SubjectKind) = match size {
        WidgetSize::Small => match pick_pair_for_small(detection, width, height) {
            Some(pair) => (pair.boxes.to_vec(), pair.kind),
            None => (detection.boxes.iter().take(1).copied().collect(), chosen),
        },
        WidgetSize::Medium => (detection.boxes.iter().take(2).copied().collect(), chosen),
        WidgetSize::Large => (detection.boxes.clone(), chosen),
    };
    if selected.is_empty() {
        return centred_crop(width, height, aspect);
    }

    let union = selected
        .iter()
        .map(|b| expand_subject_box(b, kind, size, width, height).intersection(&bounds))
        .reduce(|acc, r| acc.union(&r))
        .unwrap_or_else(|| centred_crop(width, height, aspect));

    let focus = union.scaled_about_centre(tuning.safety_scale).intersection(&bounds);
    let (mut cx, mut cy) = match size {
        // Small keeps pairs centred even when the safety margin is clipped.
        WidgetSize::Small => (union.mid_x(), union.mid_y()),
        _ => (focus.mid_x(), focus.mid_y()),
    };

    let mut base = Dims {
        w: focus.width,
        h: focus.height,
    };
    if focus.width.max(0.0001) / focus.height.max(0.0001) > aspect {
        base.h = base.w / aspect;
    } else {
        base.w = base.h * aspect;
    }

    let min_w = width * tuning.min_dimension_fraction;
    let min_h = height * tuning.min_dimension_fraction;

    // Smallest crop that still holds the padded subjects.
    let min_allowed = base
        .raise_to(min_w, min_h, aspect)
        .cap_to(width, height, aspect);

    let mut crop = Dims {
        w: base.w * tuning.headroom,
        h: base.h * tuning.headroom,
    }
    .raise_to(min_w, min_h, aspect)
    .cap_to(width, height, aspect);

    let bias = upward_bias(kind, size);
    if bias > 0.0 {
        let reference = if size == WidgetSize::Small { union.height } else { focus.height };
        cy -= reference * bias;
    }

    if size == WidgetSize::Small {
        let max_area = (width * height).max(1.0) * SMALL_MAX_AREA_FRACTION;
        if crop.w * crop.h > max_area {
            let max_w = (max_area * aspect).sqrt().min(width.min(height * aspect));
            let max_h = max_w / aspect;
            if max_w >= min_allowed.w && max_h >= min_allowed.h {
                crop.w = crop.w.min(max_w);
                crop.h = crop.w / aspect;
            }
        }

        // Prefer shrinking toward the minimum over shifting off-centre.
        let max_w_centred = (2.0 * cx.min(width - cx)).min(2.0 * cy.min(height - cy) * aspect);
        let max_h_centred = max_w_centred / aspect;
        if crop.w > max_w_centred && max_w_centred >= min_allowed.w && max_h_centred >= min_allowed.h {
            crop.w = max_w_centred;
            crop.h = max_h_centred;
        }
    }

    cx -= crop.w / 2.0;
    cy -= crop.h / 2.0;
    let x = cx.max(0.0).min(width - crop.w);
    let y = cy.max(0.0).min(height - crop.h);
    Rect::new(x, y, crop.w, crop.h).intersection(&bounds)
}
