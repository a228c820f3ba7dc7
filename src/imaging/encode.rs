//! Size-disciplined JPEG encoding.
//!
//! Encodes with `image::codecs::jpeg::JpegEncoder`, stepping the quality
//! down until the output fits its byte budget or the quality floor is hit.
//! Every output carries an EXIF segment declaring orientation 1, since the
//! pixels are always written upright.

use super::params::{EncodeSettings, MAX_QUALITY_STEPS, QUALITY_FLOOR, Quality};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use little_exif::exif_tag::ExifTag;
use little_exif::filetype::FileExtension;
use little_exif::metadata::Metadata;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encoder produced no data")]
    Empty,
    #[error("JPEG encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("could not write EXIF orientation: {0}")]
    Exif(std::io::Error),
}

/// Result of one budgeted encode.
#[derive(Debug, Clone)]
pub struct EncodedJpeg {
    pub bytes: Vec<u8>,
    /// Quality the returned bytes were written at.
    pub quality: Quality,
    /// Number of quality reductions performed.
    pub steps: u32,
}

/// Encode `image` as JPEG within `settings.max_bytes` where possible.
///
/// The start quality is clamped to 0.10–0.95. While the output is over
/// budget and the quality is above 0.65, the quality drops by 0.05, at most
/// six times. The last attempt is returned even if still over budget.
pub fn encode_jpeg(image: &RgbImage, settings: &EncodeSettings) -> Result<EncodedJpeg, EncodeError> {
    let mut quality = settings.quality();
    let mut bytes = encode_at(image, quality)?;
    let mut steps = 0;
    while bytes.len() > settings.max_bytes
        && quality.value() > QUALITY_FLOOR
        && steps < MAX_QUALITY_STEPS
    {
        quality = quality.stepped_down();
        bytes = encode_at(image, quality)?;
        steps += 1;
    }
    if bytes.is_empty() {
        return Err(EncodeError::Empty);
    }
    Ok(EncodedJpeg {
        bytes,
        quality,
        steps,
    })
}

fn encode_at(image: &RgbImage, quality: Quality) -> Result<Vec<u8>, EncodeError> {
    let mut raw = Vec::new();
    JpegEncoder::new_with_quality(&mut raw, quality.percent()).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    if raw.is_empty() {
        return Err(EncodeError::Empty);
    }
    tag_orientation(raw, 1)
}

/// Write an EXIF block holding `orientation` into `jpeg`, replacing any
/// EXIF it already carries.
pub fn tag_orientation(mut jpeg: Vec<u8>, orientation: u16) -> Result<Vec<u8>, EncodeError> {
    let mut metadata = Metadata::new();
    metadata.set_tag(ExifTag::Orientation(vec![orientation]));
    metadata
        .write_to_vec(&mut jpeg, FileExtension::JPEG)
        .map_err(EncodeError::Exif)?;
    Ok(jpeg)
}
