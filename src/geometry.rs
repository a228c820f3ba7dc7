//! Rectangle and size types shared by the planner, renderer, and documents.
//!
//! Two coordinate spaces exist:
//!
//! - [`Rect`]: `f64` pixel space, top-left origin. Used while planning crops
//!   against the analysis image and while rendering against the master.
//! - [`NormalizedRect`]: fractions of the source image (0..1). This is what
//!   gets persisted, because the analysis image and the master have different
//!   resolutions and the same crop must apply to both.

use serde::{Deserialize, Serialize};

/// Smallest width/height a normalised rectangle may have.
const MIN_NORMALIZED_SIDE: f64 = 0.0001;

/// Axis-aligned rectangle in pixel space (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering an image of the given size.
    pub fn from_size(width: f64, height: f64) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn min_x(&self) -> f64 {
        self.x
    }

    pub fn min_y(&self) -> f64 {
        self.y
    }

    pub fn max_x(&self) -> f64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f64 {
        self.y + self.height
    }

    pub fn mid_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn mid_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    /// Area, treating negative sides as zero.
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x0 = self.min_x().min(other.min_x());
        let y0 = self.min_y().min(other.min_y());
        let x1 = self.max_x().max(other.max_x());
        let y1 = self.max_y().max(other.max_y());
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Overlap of two rectangles. Disjoint inputs yield an empty rectangle
    /// (zero width and/or height) rather than a negative one.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x0 = self.min_x().max(other.min_x());
        let y0 = self.min_y().max(other.min_y());
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        Rect::new(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }

    /// Grow (negative `dx`/`dy`) or shrink the rectangle about its centre.
    pub fn inset(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(
            self.x + dx,
            self.y + dy,
            self.width - 2.0 * dx,
            self.height - 2.0 * dy,
        )
    }

    /// Scale both sides by `factor`, keeping the centre fixed.
    ///
    /// Non-finite or non-positive factors return the rectangle unchanged.
    pub fn scaled_about_centre(&self, factor: f64) -> Rect {
        if !factor.is_finite() || factor <= 0.0 {
            return *self;
        }
        let w = self.width * factor;
        let h = self.height * factor;
        Rect::new(self.mid_x() - w / 2.0, self.mid_y() - h / 2.0, w, h)
    }

    /// Round outward to whole pixels.
    pub fn integral(&self) -> Rect {
        let x0 = self.min_x().floor();
        let y0 = self.min_y().floor();
        let x1 = self.max_x().ceil();
        let y1 = self.max_y().ceil();
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Intersection-over-union with another rectangle.
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection(other);
        if inter.is_empty() {
            return 0.0;
        }
        let inter_area = inter.area();
        let union_area = self.area() + other.area() - inter_area;
        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Overlap area divided by the smaller of the two areas.
    pub fn overlap_ratio_min(&self, other: &Rect) -> f64 {
        let inter = self.intersection(other);
        if inter.is_empty() {
            return 0.0;
        }
        let min_area = self.area().min(other.area());
        if min_area > 0.0 {
            inter.area() / min_area
        } else {
            0.0
        }
    }
}

/// Integer pixel dimensions of a render target or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }.normalised()
    }

    /// Both sides forced to at least one pixel.
    pub fn normalised(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    /// Width over height; the height is floored at 1.
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A crop rectangle expressed as fractions of the source image.
///
/// Invariant (after [`normalised`](Self::normalised)): `0 ≤ x`, `0 ≤ y`,
/// `x + width ≤ 1`, `y + height ≤ 1`, `width > 0`, `height > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole image.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Express a pixel rectangle as fractions of an image of `width`×`height`.
    pub fn from_pixels(rect: &Rect, width: f64, height: f64) -> Self {
        if width <= 0.0 || height <= 0.0 {
            return Self::full();
        }
        Self::new(
            rect.x / width,
            rect.y / height,
            rect.width / width,
            rect.height / height,
        )
        .normalised()
    }

    /// Denormalise against an image of `width`×`height` pixels.
    pub fn to_pixels(&self, width: f64, height: f64) -> Rect {
        Rect::new(
            self.x * width,
            self.y * height,
            self.width * width,
            self.height * height,
        )
    }

    /// Repair the rectangle so it satisfies the type invariant.
    ///
    /// Non-finite components fall back to the full frame. Sides are clamped to
    /// `[0.0001, 1]` and the origin is pulled inside so the rectangle fits.
    pub fn normalised(&self) -> Self {
        if !(self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite())
        {
            return Self::full();
        }
        let width = self.width.clamp(MIN_NORMALIZED_SIDE, 1.0);
        let height = self.height.clamp(MIN_NORMALIZED_SIDE, 1.0);
        let x = self.x.clamp(0.0, 1.0 - width);
        let y = self.y.clamp(0.0, 1.0 - height);
        Self::new(x, y, width, height)
    }

    /// Whether the invariant holds within `epsilon`.
    pub fn is_valid(&self, epsilon: f64) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0 + epsilon
            && self.y + self.height <= 1.0 + epsilon
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn centre(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::full()
    }
}
