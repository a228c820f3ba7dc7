//! Decoding with EXIF orientation applied.
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with guessed format |
//! | Orientation tag | `kamadak-exif` (`Tag::Orientation`, primary IFD) |
//! | Rotate / flip | `DynamicImage::{rotate90, rotate180, rotate270, fliph, flipv}` |
//! | Downsample | `image::imageops::resize` with `Lanczos3` |
//!
//! Some encoders write a 90° orientation tag on pixels that were already
//! rotated. When the tag asks for a quarter turn (EXIF 5–8) but the stored
//! pixels are portrait-shaped, the rotation is skipped.

use crate::geometry::PixelSize;
use exif::{In, Reader, Tag};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("no image data")]
    Empty,
    #[error("max edge must be non-zero")]
    InvalidMaxEdge,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// EXIF orientation values 1–8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map a raw tag value; anything outside 1–8 is treated as normal.
    pub fn from_exif(value: u32) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    /// Whether applying this orientation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }
}

/// Read the orientation tag from an image container.
///
/// Missing or unreadable EXIF data is not an error; it means "normal".
pub fn read_orientation(bytes: &[u8]) -> Orientation {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(_) => return Orientation::Normal,
    };
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(Orientation::from_exif)
        .unwrap_or_default()
}

/// Apply `orientation` to decoded pixels, honouring the portrait guard.
pub fn apply_orientation(image: DynamicImage, orientation: Orientation) -> DynamicImage {
    if orientation.swaps_axes() && image.height() > image.width() {
        return image;
    }
    match orientation {
        Orientation::Normal => image,
        Orientation::FlipHorizontal => image.fliph(),
        Orientation::Rotate180 => image.rotate180(),
        Orientation::FlipVertical => image.flipv(),
        Orientation::Transpose => image.rotate90().fliph(),
        Orientation::Rotate90 => image.rotate90(),
        Orientation::Transverse => image.rotate270().fliph(),
        Orientation::Rotate270 => image.rotate270(),
    }
}

/// Decode bytes into an upright RGB buffer at full resolution.
///
/// Alpha is flattened over black.
pub fn decode_oriented(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    let image = apply_orientation(image, read_orientation(bytes));
    Ok(flatten_over_black(image))
}

/// Decode, orient, and shrink so the longest edge is at most `max_edge`.
///
/// Images already within the limit are returned at their own size.
pub fn downsample(bytes: &[u8], max_edge: u32) -> Result<RgbImage, DecodeError> {
    if max_edge == 0 {
        return Err(DecodeError::InvalidMaxEdge);
    }
    let image = decode_oriented(bytes)?;
    Ok(fit_within(image, max_edge))
}

/// Shrink `image` so its longest edge is at most `max_edge` (never upscales).
pub fn fit_within(image: RgbImage, max_edge: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_edge || max_edge == 0 {
        return image;
    }
    let (nw, nh) = scaled_dimensions(w, h, max_edge);
    image::imageops::resize(&image, nw, nh, FilterType::Lanczos3)
}

/// Dimensions after scaling the longest edge down to `max_edge`.
///
/// # Arguments
/// * `width`, `height` - Source dimensions
/// * `max_edge` - Upper bound for the longest edge
fn scaled_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height).max(1) as f64;
    let scale = max_edge as f64 / longest;
    let nw = ((width as f64 * scale).round() as u32).max(1);
    let nh = ((height as f64 * scale).round() as u32).max(1);
    (nw, nh)
}

/// Upright pixel dimensions without decoding the whole image.
pub fn oriented_dimensions(bytes: &[u8]) -> Result<PixelSize, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let (w, h) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    let orientation = read_orientation(bytes);
    if orientation.swaps_axes() && h <= w {
        Ok(PixelSize::new(h, w))
    } else {
        Ok(PixelSize::new(w, h))
    }
}

fn flatten_over_black(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.into_rgb8();
    }
    let rgba = image.into_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let a = p[3] as u16;
        let blend = |c: u8| ((c as u16 * a + 127) / 255) as u8;
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_bytes, jpeg_bytes_with_orientation};
    use image::{Rgba, RgbaImage};

    #[test]
    fn downsample_limits_longest_edge() {
        let bytes = jpeg_bytes(400, 200);
        let img = downsample(&bytes, 100).unwrap();
        assert_eq!(img.dimensions(), (100, 50));
    }

    #[test]
    fn downsample_never_upscales() {
        let bytes = jpeg_bytes(64, 32);
        let img = downsample(&bytes, 1024).unwrap();
        assert_eq!(img.dimensions(), (64, 32));
    }

    #[test]
    fn zero_max_edge_is_error() {
        let bytes = jpeg_bytes(64, 32);
        assert!(matches!(
            downsample(&bytes, 0),
            Err(DecodeError::InvalidMaxEdge)
        ));
    }

    #[test]
    fn empty_and_garbage_bytes_fail() {
        assert!(matches!(downsample(&[], 100), Err(DecodeError::Empty)));
        assert!(downsample(b"definitely not an image", 100).is_err());
    }

    #[test]
    fn rotate90_tag_on_landscape_pixels_rotates() {
        let bytes = jpeg_bytes_with_orientation(120, 80, 6);
        let img = decode_oriented(&bytes).unwrap();
        assert_eq!(img.dimensions(), (80, 120));
    }

    #[test]
    fn rotate90_tag_on_portrait_pixels_is_skipped() {
        let bytes = jpeg_bytes_with_orientation(80, 120, 6);
        let img = decode_oriented(&bytes).unwrap();
        assert_eq!(img.dimensions(), (80, 120));
    }

    #[test]
    fn oriented_dimensions_follow_guard() {
        let landscape = jpeg_bytes_with_orientation(120, 80, 8);
        assert_eq!(oriented_dimensions(&landscape).unwrap(), PixelSize::new(80, 120));
        let portrait = jpeg_bytes_with_orientation(80, 120, 8);
        assert_eq!(oriented_dimensions(&portrait).unwrap(), PixelSize::new(80, 120));
    }

    #[test]
    fn orientation_from_exif_values() {
        assert_eq!(Orientation::from_exif(1), Orientation::Normal);
        assert_eq!(Orientation::from_exif(6), Orientation::Rotate90);
        assert_eq!(Orientation::from_exif(42), Orientation::Normal);
        assert!(Orientation::Transverse.swaps_axes());
        assert!(!Orientation::Rotate180.swaps_axes());
    }

    #[test]
    fn transparent_pixels_flatten_to_black() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([255, 255, 255, 0]));
        rgba.put_pixel(1, 0, Rgba([200, 100, 50, 255]));
        let rgb = flatten_over_black(DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 100, 50]);
    }

    #[test]
    fn scaled_dimensions_keep_aspect() {
        assert_eq!(scaled_dimensions(4000, 3000, 1024), (1024, 768));
        assert_eq!(scaled_dimensions(3000, 4000, 1024), (768, 1024));
    }
}
