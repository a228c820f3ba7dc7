//! Cutting crops out of a master and scaling them to widget pixels.
//!
//! All functions are pure: an RGB buffer in, a new RGB buffer out. Output is
//! opaque; anything uncovered (corners exposed by straightening) is black.

use super::params::ManualTransform;
use crate::geometry::{NormalizedRect, PixelSize, Rect};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};

/// Pixel rectangle a normalised crop selects on a `width`×`height` image.
///
/// The crop is denormalised, rounded outward to whole pixels and intersected
/// with the image bounds. An empty result selects the whole image.
pub fn crop_pixels(crop: &NormalizedRect, width: u32, height: u32) -> Rect {
    let bounds = Rect::from_size(width as f64, height as f64);
    let rect = crop
        .to_pixels(width as f64, height as f64)
        .integral()
        .intersection(&bounds);
    if rect.is_empty() { bounds } else { rect }
}

/// Render one widget variant: crop `master` and scale to exactly `target`.
pub fn render(master: &RgbImage, crop: &NormalizedRect, target: PixelSize) -> RgbImage {
    let rect = crop_pixels(crop, master.width(), master.height());
    scale_region(master, &rect, target)
}

/// Render a manual variant: turn, straighten, then crop and scale.
pub fn render_manual(
    master: &RgbImage,
    crop: &NormalizedRect,
    transform: &ManualTransform,
    target: PixelSize,
) -> RgbImage {
    let turned = rotate_quarter_turns(master, transform.normalised_quarter_turns());
    let rotated = straighten(&turned, transform.straighten_degrees);
    let safe_crop = crop.normalised();
    let rect = crop_pixels(&safe_crop, rotated.width(), rotated.height());
    scale_region(&rotated, &rect, target.normalised())
}

/// Rotate clockwise by `turns` quarter turns (0–3).
pub fn rotate_quarter_turns(image: &RgbImage, turns: u8) -> RgbImage {
    match turns % 4 {
        1 => image::imageops::rotate90(image),
        2 => image::imageops::rotate180(image),
        3 => image::imageops::rotate270(image),
        _ => image.clone(),
    }
}

/// Rotate clockwise by `degrees` about the centre, keeping the image size.
///
/// Corners that rotate in from outside are filled with black. Angles below
/// 0.0001° return a copy unchanged.
pub fn straighten(image: &RgbImage, degrees: f64) -> RgbImage {
    if !degrees.is_finite() || degrees.abs() < 0.0001 {
        return image.clone();
    }
    let radians = degrees.to_radians() as f32;
    rotate_about_center(image, radians, Interpolation::Bicubic, Rgb([0, 0, 0]))
}

fn scale_region(source: &RgbImage, rect: &Rect, target: PixelSize) -> RgbImage {
    let x = rect.x.max(0.0) as u32;
    let y = rect.y.max(0.0) as u32;
    let w = (rect.width as u32).clamp(1, source.width().saturating_sub(x).max(1));
    let h = (rect.height as u32).clamp(1, source.height().saturating_sub(y).max(1));
    let region = image::imageops::crop_imm(source, x, y, w, h).to_image();
    if region.dimensions() == (target.width, target.height) {
        return region;
    }
    image::imageops::resize(&region, target.width, target.height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{gradient_image, noise_image};

    #[test]
    fn render_produces_exact_target_size() {
        let master = noise_image(300, 200, 5);
        for (crop, target) in [
            (NormalizedRect::full(), PixelSize::new(510, 510)),
            (NormalizedRect::new(0.1, 0.2, 0.5, 0.3), PixelSize::new(1092, 510)),
            (NormalizedRect::new(0.9, 0.9, 0.1, 0.1), PixelSize::new(7, 3)),
        ] {
            let out = render(&master, &crop, target);
            assert_eq!(out.dimensions(), (target.width, target.height));
        }
    }

    #[test]
    fn crop_pixels_rounds_outward_and_clamps() {
        let rect = crop_pixels(&NormalizedRect::new(0.101, 0.0, 0.95, 0.5), 100, 100);
        assert_eq!(rect, Rect::new(10.0, 0.0, 90.0, 50.0));
    }

    #[test]
    fn degenerate_crop_falls_back_to_full_image() {
        let rect = crop_pixels(&NormalizedRect::new(2.0, 2.0, 0.5, 0.5), 40, 30);
        assert_eq!(rect, Rect::new(0.0, 0.0, 40.0, 30.0));
    }

    #[test]
    fn render_samples_the_cropped_region() {
        // Left half black, right half white.
        let master = RgbImage::from_fn(100, 50, |x, _| {
            if x < 50 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let out = render(&master, &NormalizedRect::new(0.6, 0.0, 0.4, 1.0), PixelSize::new(8, 8));
        assert!(out.pixels().all(|p| p.0[0] > 200));
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let img = gradient_image(40, 20);
        assert_eq!(rotate_quarter_turns(&img, 1).dimensions(), (20, 40));
        assert_eq!(rotate_quarter_turns(&img, 2).dimensions(), (40, 20));
        assert_eq!(rotate_quarter_turns(&img, 0), img);
    }

    #[test]
    fn straighten_keeps_size_and_fills_corners_black() {
        let img = RgbImage::from_pixel(60, 40, Rgb([255, 255, 255]));
        let out = straighten(&img, 20.0);
        assert_eq!(out.dimensions(), (60, 40));
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(straighten(&img, 0.00001), img);
    }

    #[test]
    fn render_manual_with_turn_targets_size() {
        let master = noise_image(120, 80, 9);
        let transform = ManualTransform {
            quarter_turns: 1,
            straighten_degrees: 5.0,
        };
        let out = render_manual(&master, &NormalizedRect::new(0.0, 0.0, 1.0, 0.5), &transform, PixelSize::new(30, 20));
        assert_eq!(out.dimensions(), (30, 20));
    }
}
