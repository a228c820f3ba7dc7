//! Image processing: pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode + orient** | `image::ImageReader` + `kamadak-exif` |
//! | **Downsample** | Lanczos3 via `image::imageops::resize` |
//! | **Crop + scale** | `imageops::crop_imm` + `resize` |
//! | **Straighten** | `imageproc::geometric_transformations::rotate_about_center` |
//! | **Encode** | `JpegEncoder` with a quality-stepping byte budget |
//!
//! The module is split into:
//! - **Decode**: bytes to upright RGB buffers
//! - **Render**: pure pixel transforms for widget variants
//! - **Encode**: JPEG output with size discipline and orientation metadata
//! - **Parameters**: data describing encodes and manual transforms

pub mod decode;
pub mod encode;
mod params;
pub mod render;

pub use decode::{DecodeError, Orientation, decode_oriented, downsample, oriented_dimensions};
pub use encode::{EncodeError, EncodedJpeg, encode_jpeg};
pub use params::{EncodeSettings, ManualTransform, QUALITY_FLOOR, Quality};
pub use render::{render, render_manual};
