//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They sit between
//! callers that decide which files to produce (the pipeline and the manual
//! override) and the functions that do the pixel and codec work.
//!
//! ## Types
//!
//! - [`Quality`]: JPEG quality as a fraction, clamped to 0.10–0.95 on construction.
//! - [`EncodeSettings`]: start quality plus a byte budget for the size-disciplined encoder.
//! - [`ManualTransform`]: quarter turns and straighten angle applied before a manual crop.

/// Lowest quality the encoder will step down to while chasing a byte budget.
pub const QUALITY_FLOOR: f64 = 0.65;
/// Amount the quality drops on each retry.
pub const QUALITY_STEP: f64 = 0.05;
/// Maximum number of quality reductions per encode.
pub const MAX_QUALITY_STEPS: u32 = 6;

/// Quality setting for lossy JPEG encoding (0.10–0.95).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Quality(f64);

impl Quality {
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::default();
        }
        Self(value.clamp(0.10, 0.95))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Quality on the 1–100 scale the JPEG encoder takes.
    pub fn percent(self) -> u8 {
        (self.0 * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// The next lower quality, never below [`QUALITY_FLOOR`].
    pub fn stepped_down(self) -> Self {
        Self::new((self.0 - QUALITY_STEP).max(QUALITY_FLOOR))
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(0.85)
    }
}

/// Start quality and size ceiling for one encoded file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeSettings {
    pub start_quality: f64,
    pub max_bytes: usize,
}

impl EncodeSettings {
    pub fn new(start_quality: f64, max_bytes: usize) -> Self {
        Self {
            start_quality,
            max_bytes,
        }
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.start_quality)
    }
}

/// Rotation applied to the master before a manual crop is cut.
///
/// Quarter turns are applied first (clockwise), then the straighten angle
/// rotates the turned image about its centre within its own bounds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualTransform {
    pub quarter_turns: i32,
    pub straighten_degrees: f64,
}

impl ManualTransform {
    /// Quarter turns reduced to 0–3 (negative turns count backwards).
    pub fn normalised_quarter_turns(&self) -> u8 {
        self.quarter_turns.rem_euclid(4) as u8
    }

    pub fn is_identity(&self) -> bool {
        self.normalised_quarter_turns() == 0 && self.straighten_degrees.abs() < 0.0001
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0.0).value(), 0.10);
        assert_eq!(Quality::new(0.5).value(), 0.5);
        assert_eq!(Quality::new(1.5).value(), 0.95);
        assert_eq!(Quality::new(f64::NAN), Quality::default());
    }

    #[test]
    fn quality_percent_rounds() {
        assert_eq!(Quality::new(0.88).percent(), 88);
        assert_eq!(Quality::new(0.10).percent(), 10);
    }

    #[test]
    fn stepping_stops_at_floor() {
        let q = Quality::new(0.68).stepped_down();
        assert_eq!(q.value(), QUALITY_FLOOR);
        assert_eq!(q.stepped_down().value(), QUALITY_FLOOR);
    }

    #[test]
    fn quarter_turns_wrap_both_ways() {
        let t = |n| ManualTransform {
            quarter_turns: n,
            straighten_degrees: 0.0,
        };
        assert_eq!(t(5).normalised_quarter_turns(), 1);
        assert_eq!(t(-1).normalised_quarter_turns(), 3);
        assert!(t(4).is_identity());
        assert!(!t(2).is_identity());
    }
}
