//! Edge-density saliency.
//!
//! Runs Canny on the luma channel, measures edge density on a coarse grid and
//! groups neighbouring dense cells into regions. Busy, detailed areas of a
//! photo (a subject against sky, foliage against a wall) come out as salient;
//! flat areas do not.

use super::{DetectError, NativeBox, SubjectDetector, SubjectKind};
use crate::geometry::Rect;
use image::RgbImage;
use imageproc::edges::canny;

/// Grid-based saliency detector.
#[derive(Debug, Clone)]
pub struct SaliencyDetector {
    /// Cells per side of the analysis grid.
    pub grid: u32,
    /// Canny hysteresis thresholds.
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Cells below this edge density never count as salient.
    pub min_density: f64,
    /// A cell is salient when its density reaches this fraction of the
    /// densest cell.
    pub relative_threshold: f64,
    /// Maximum regions reported, strongest first.
    pub max_regions: usize,
}

impl Default for SaliencyDetector {
    fn default() -> Self {
        Self {
            grid: 8,
            low_threshold: 30.0,
            high_threshold: 80.0,
            min_density: 0.02,
            relative_threshold: 0.5,
            max_regions: 3,
        }
    }
}

struct Region {
    rect: Rect,
    weight: f64,
}

impl SaliencyDetector {
    /// Edge density of every grid cell, row-major.
    fn cell_densities(&self, image: &RgbImage) -> Vec<f64> {
        let (w, h) = image.dimensions();
        let gray = image::imageops::grayscale(image);
        let edges = canny(&gray, self.low_threshold, self.high_threshold);
        let grid = self.grid;
        let mut densities = Vec::with_capacity((grid * grid) as usize);
        for row in 0..grid {
            let (y0, y1) = (row * h / grid, (row + 1) * h / grid);
            for col in 0..grid {
                let (x0, x1) = (col * w / grid, (col + 1) * w / grid);
                let area = ((x1 - x0) * (y1 - y0)).max(1) as f64;
                let mut count = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        if edges.get_pixel(x, y).0[0] > 0 {
                            count += 1;
                        }
                    }
                }
                densities.push(count as f64 / area);
            }
        }
        densities
    }

    /// Join 4-connected hot cells into pixel-space regions.
    fn regions(&self, densities: &[f64], width: u32, height: u32) -> Vec<Region> {
        let grid = self.grid as usize;
        let max = densities.iter().copied().fold(0.0, f64::max);
        if max < self.min_density {
            return Vec::new();
        }
        let cutoff = self.min_density.max(self.relative_threshold * max);
        let hot: Vec<bool> = densities.iter().map(|d| *d >= cutoff).collect();
        let mut seen = vec![false; hot.len()];
        let mut regions = Vec::new();

        for start in 0..hot.len() {
            if !hot[start] || seen[start] {
                continue;
            }
            let (mut c0, mut r0, mut c1, mut r1) = (grid, grid, 0, 0);
            let mut weight = 0.0;
            let mut stack = vec![start];
            seen[start] = true;
            while let Some(i) = stack.pop() {
                let (row, col) = (i / grid, i % grid);
                c0 = c0.min(col);
                c1 = c1.max(col);
                r0 = r0.min(row);
                r1 = r1.max(row);
                weight += densities[i];
                let mut push = |j: usize| {
                    if hot[j] && !seen[j] {
                        seen[j] = true;
                        stack.push(j);
                    }
                };
                if col > 0 {
                    push(i - 1);
                }
                if col + 1 < grid {
                    push(i + 1);
                }
                if row > 0 {
                    push(i - grid);
                }
                if row + 1 < grid {
                    push(i + grid);
                }
            }
            let g = grid as u32;
            let x0 = c0 as u32 * width / g;
            let x1 = (c1 as u32 + 1) * width / g;
            let y0 = r0 as u32 * height / g;
            let y1 = (r1 as u32 + 1) * height / g;
            regions.push(Region {
                rect: Rect::new(x0 as f64, y0 as f64, (x1 - x0) as f64, (y1 - y0) as f64),
                weight,
            });
        }

        regions.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        regions.truncate(self.max_regions);
        regions
    }
}

impl SubjectDetector for SaliencyDetector {
    fn kind(&self) -> SubjectKind {
        SubjectKind::Saliency
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<NativeBox>, DetectError> {
        let (w, h) = image.dimensions();
        if self.grid == 0 || w < self.grid || h < self.grid {
            return Ok(Vec::new());
        }
        let densities = self.cell_densities(image);
        Ok(self
            .regions(&densities, w, h)
            .into_iter()
            .map(|r| NativeBox::PixelTopLeft(r.rect))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::checker_patch_image;

    #[test]
    fn flat_image_has_no_saliency() {
        let img = RgbImage::from_pixel(160, 120, image::Rgb([90, 90, 90]));
        assert!(SaliencyDetector::default().detect(&img).unwrap().is_empty());
    }

    #[test]
    fn textured_patch_is_found() {
        // Checkerboard in the top-right quarter of a flat frame.
        let img = checker_patch_image(160, 160, Rect::new(80.0, 0.0, 80.0, 80.0));
        let boxes = SaliencyDetector::default().detect(&img).unwrap();
        assert!(!boxes.is_empty());
        let NativeBox::PixelTopLeft(rect) = boxes[0] else {
            panic!("expected pixel box");
        };
        assert!(rect.mid_x() > 80.0, "box {rect:?} should sit on the right");
        assert!(rect.mid_y() < 80.0, "box {rect:?} should sit at the top");
    }

    #[test]
    fn tiny_images_are_skipped() {
        let img = RgbImage::new(4, 4);
        assert!(SaliencyDetector::default().detect(&img).unwrap().is_empty());
    }

    #[test]
    fn separate_patches_become_separate_regions() {
        let detector = SaliencyDetector::default();
        let mut densities = vec![0.0; 64];
        densities[0] = 0.4;
        densities[63] = 0.3;
        let regions = detector.regions(&densities, 80, 80);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].rect, Rect::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(regions[1].rect, Rect::new(70.0, 70.0, 10.0, 10.0));
    }
}
