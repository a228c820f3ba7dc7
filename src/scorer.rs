//! Photo quality scoring for shuffle ordering.
//!
//! A score is a sum of cheap, explainable signals, clamped to `[-10, 10]`,
//! with a flag naming each signal that fired:
//!
//! | Signal | Effect | Flag |
//! |---|---|---|
//! | Faces | `+min(2.4, n)` | `faces N` |
//! | Animals | `+min(1.6, 0.8·n)` | `animals N` |
//! | Sharpness (mean luma gradient / 18) | `+1.6·s`, `-0.8` below 0.12 | `blurry` |
//! | Over 65 % of pixels below 20 / above 235 | `-1.4` | `too dark` / `too bright` |
//! | Luma std / 64 below 0.08 | `-0.6` | `flat` |
//! | Crop area per size below 0.14 / 0.22 / 0.30 | `-1.4` / `-0.9` / `-0.4` | `extreme zoom S`, `zoom M`, `tight L` |
//!
//! A photo that cannot be decoded scores 0 with the single flag
//! `decode failed`.

use crate::detect::{DetectorEnsemble, SubjectKind};
use crate::imaging::downsample;
use crate::types::SmartPhotoSpec;
use image::GrayImage;
use std::collections::HashSet;
use tracing::debug;

/// Result of scoring one photo.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityScore {
    pub score: f64,
    pub flags: Vec<String>,
}

/// Rates a prepared photo for shuffle ordering. Higher is better.
pub trait QualityScorer: Send + Sync {
    /// Score `bytes` (the original photo) given its prepared `spec`.
    /// `id` is the photo's identifier within its source and `detectors` the
    /// set the pipeline used for this photo.
    fn score(
        &self,
        id: &str,
        bytes: &[u8],
        spec: &SmartPhotoSpec,
        detectors: &DetectorEnsemble,
    ) -> QualityScore;
}

/// The built-in scorer.
#[derive(Debug, Clone, Copy)]
pub struct DefaultScorer {
    /// Longest edge the photo is decoded at.
    pub max_edge: u32,
}

impl Default for DefaultScorer {
    fn default() -> Self {
        Self { max_edge: 512 }
    }
}

impl QualityScorer for DefaultScorer {
    fn score(
        &self,
        id: &str,
        bytes: &[u8],
        spec: &SmartPhotoSpec,
        detectors: &DetectorEnsemble,
    ) -> QualityScore {
        let Ok(image) = downsample(bytes, self.max_edge.max(1)) else {
            return QualityScore {
                score: 0.0,
                flags: vec!["decode failed".to_string()],
            };
        };

        let mut score = 0.0;
        let mut flags = Vec::new();

        let detection = detectors.detect(&image);
        if !detection.failed.is_empty() {
            flags.push("vision failed".to_string());
        }
        let faces = detection.count(SubjectKind::Face);
        if faces > 0 {
            flags.push(format!("faces {faces}"));
            score += (faces as f64).min(2.4);
        }
        let animals = detection.count(SubjectKind::Animal);
        if animals > 0 {
            flags.push(format!("animals {animals}"));
            score += (animals as f64 * 0.8).min(1.6);
        }

        let luma = image::imageops::grayscale(&image);
        if let Some(stats) = LumaStats::analyse(&luma) {
            score += stats.sharpness * 1.6;
            if stats.sharpness < 0.12 {
                flags.push("blurry".to_string());
                score -= 0.8;
            }
            if stats.dark_fraction > 0.65 {
                flags.push("too dark".to_string());
                score -= 1.4;
            }
            if stats.bright_fraction > 0.65 {
                flags.push("too bright".to_string());
                score -= 1.4;
            }
            if stats.contrast < 0.08 {
                flags.push("flat".to_string());
                score -= 0.6;
            }
        }

        score -= zoom_penalty(spec, &mut flags);

        let result = QualityScore {
            score: score.clamp(-10.0, 10.0),
            flags: dedupe(flags),
        };
        debug!(entry = %id, score = result.score, flags = ?result.flags, "scored photo");
        result
    }
}

/// Luma statistics, all normalised to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub sharpness: f64,
    pub dark_fraction: f64,
    pub bright_fraction: f64,
    pub contrast: f64,
}

impl LumaStats {
    /// `None` for images with a side of one pixel or less.
    pub fn analyse(luma: &GrayImage) -> Option<Self> {
        let (w, h) = (luma.width() as usize, luma.height() as usize);
        if w <= 1 || h <= 1 {
            return None;
        }
        let px = luma.as_raw();
        let n = px.len() as f64;

        let mean = px.iter().map(|&p| p as f64).sum::<f64>() / n;
        let variance = px.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / n;
        let dark = px.iter().filter(|&&p| p < 20).count() as f64;
        let bright = px.iter().filter(|&&p| p > 235).count() as f64;

        let mut gradient = 0.0;
        for y in 0..h {
            let row = &px[y * w..(y + 1) * w];
            gradient += row.windows(2).map(|p| p[0].abs_diff(p[1]) as f64).sum::<f64>();
            if y + 1 < h {
                let next = &px[(y + 1) * w..(y + 2) * w];
                gradient += row
                    .iter()
                    .zip(next)
                    .map(|(a, b)| a.abs_diff(*b) as f64)
                    .sum::<f64>();
            }
        }
        let pairs = ((w - 1) * h + w * (h - 1)) as f64;

        Some(Self {
            sharpness: (gradient / pairs / 18.0).min(1.0),
            dark_fraction: dark / n,
            bright_fraction: bright / n,
            contrast: (variance.sqrt() / 64.0).min(1.0),
        })
    }
}

/// Penalty for crops that zoom in hard, one term per size.
pub fn zoom_penalty(spec: &SmartPhotoSpec, flags: &mut Vec<String>) -> f64 {
    let mut penalty = 0.0;
    for (size, variant) in spec.variants.iter() {
        let area = variant.crop.area();
        let label = size.letter();
        let (cost, flag) = if area < 0.14 {
            (1.4, format!("extreme zoom {label}"))
        } else if area < 0.22 {
            (0.9, format!("zoom {label}"))
        } else if area < 0.30 {
            (0.4, format!("tight {label}"))
        } else {
            continue;
        };
        penalty += cost;
        flags.push(flag);
    }
    penalty
}

/// Trimmed, non-empty flags in first-seen order.
pub fn dedupe(flags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    flags
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty() && seen.insert(f.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{NormalizedRect, PixelSize, Rect};
    use crate::test_helpers::{FailingDetector, FixedDetector, jpeg_bytes, noise_image};
    use crate::types::{SizeMap, VariantSpec};
    use chrono::Utc;
    use image::{Luma, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    fn spec_with_crops(area_side: f64) -> SmartPhotoSpec {
        SmartPhotoSpec {
            master_file: "m.jpg".into(),
            variants: SizeMap::from_fn(|size| VariantSpec {
                render_file: format!("{size}.jpg"),
                crop: NormalizedRect::new(0.0, 0.0, area_side, area_side),
                pixel_size: PixelSize::new(10, 10),
                manual: None,
            }),
            algorithm_version: 1,
            prepared_at: Utc::now(),
            default_file: "medium.jpg".into(),
            shuffle_manifest: None,
        }
    }

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn no_detectors() -> DetectorEnsemble {
        DetectorEnsemble::new(Vec::new())
    }

    #[test]
    fn undecodable_scores_zero() {
        let result = DefaultScorer::default().score("junk", b"junk", &spec_with_crops(1.0), &no_detectors());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.flags, vec!["decode failed"]);
    }

    #[test]
    fn black_image_is_dark_flat_and_blurry() {
        let bytes = png_bytes(&RgbImage::new(64, 64));
        let result = DefaultScorer::default().score("photo", &bytes, &spec_with_crops(1.0), &no_detectors());
        assert_eq!(result.flags, vec!["blurry", "too dark", "flat"]);
        assert!((result.score - (-0.8 - 1.4 - 0.6)).abs() < 1e-9);
    }

    #[test]
    fn noisy_image_is_sharp() {
        let bytes = png_bytes(&noise_image(64, 64, 7));
        let result = DefaultScorer::default().score("photo", &bytes, &spec_with_crops(1.0), &no_detectors());
        assert!(result.flags.is_empty(), "flags: {:?}", result.flags);
        assert!(result.score > 1.0);
    }

    #[test]
    fn faces_and_animals_add_capped_bonus() {
        let faces = FixedDetector::pixels(
            SubjectKind::Face,
            (0..4).map(|i| Rect::new(i as f64 * 10.0, 0.0, 8.0, 8.0)).collect(),
        );
        let animals = FixedDetector::pixels(
            SubjectKind::Animal,
            vec![Rect::new(0.0, 30.0, 10.0, 10.0)],
        );
        let detectors = DetectorEnsemble::new(vec![Arc::new(faces), Arc::new(animals)]);
        let bytes = png_bytes(&RgbImage::new(64, 64));
        let base = DefaultScorer::default().score("photo", &bytes, &spec_with_crops(1.0), &no_detectors());
        let result = DefaultScorer::default().score("photo", &bytes, &spec_with_crops(1.0), &detectors);
        assert!((result.score - base.score - 2.4 - 0.8).abs() < 1e-9);
        assert_eq!(&result.flags[..2], &["faces 4", "animals 1"]);
    }

    #[test]
    fn failing_detector_is_flagged() {
        let detectors = DetectorEnsemble::new(vec![Arc::new(FailingDetector(SubjectKind::Face))]);
        let result = DefaultScorer::default().score("photo", &jpeg_bytes(32, 32), &spec_with_crops(1.0), &detectors);
        assert_eq!(result.flags.first().map(String::as_str), Some("vision failed"));
    }

    #[test]
    fn zoom_penalties_per_size() {
        let mut flags = Vec::new();
        let mut spec = spec_with_crops(1.0);
        spec.variants.small.crop = NormalizedRect::new(0.0, 0.0, 0.3, 0.3);
        spec.variants.medium.crop = NormalizedRect::new(0.0, 0.0, 0.4, 0.5);
        spec.variants.large.crop = NormalizedRect::new(0.0, 0.0, 0.5, 0.5);
        let penalty = zoom_penalty(&spec, &mut flags);
        assert!((penalty - 1.4 - 0.9).abs() < 1e-9);
        assert_eq!(flags, vec!["extreme zoom S", "zoom M"]);
    }

    #[test]
    fn luma_stats_gradient() {
        // Vertical stripes alternating 0/180: every horizontal pair differs
        // by 180, vertical pairs by 0.
        let luma = GrayImage::from_fn(4, 4, |x, _| Luma([if x % 2 == 0 { 0 } else { 180 }]));
        let stats = LumaStats::analyse(&luma).unwrap();
        // 12 horizontal pairs * 180 over 24 pairs = 90 mean, capped at 1.
        assert_eq!(stats.sharpness, 1.0);
        assert_eq!(stats.dark_fraction, 0.5);
        assert!(LumaStats::analyse(&GrayImage::new(1, 5)).is_none());
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let flags = dedupe(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(flags, vec!["a", "b"]);
    }

    #[test]
    fn dedupe_trims_and_drops_blank_flags() {
        let raw = [" blurry ", "", "   ", "blurry", "flat\n"];
        let flags = dedupe(raw.iter().map(|f| f.to_string()).collect());
        assert_eq!(flags, vec!["blurry", "flat"]);
    }
}
