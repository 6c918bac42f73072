//! Raster codec backed by the `image` crate.
//!
//! ## Why convert before encoding?
//!
//! Each encoder accepts a narrow set of colour types: JPEG has no alpha
//! channel, lossless WebP wants RGB(A)8, GIF wants RGBA8. Converting up front
//! means any decoded input (16-bit PNG, grey+alpha, palette GIF) encodes to
//! any target without an `Unsupported` error from the encoder.

use super::ImageCodec;
use crate::error::FileOpsError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Raster formats accepted on upload and produced on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl RasterFormat {
    /// Match a file extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(RasterFormat::Png),
            "jpg" | "jpeg" => Some(RasterFormat::Jpeg),
            "webp" => Some(RasterFormat::Webp),
            "gif" => Some(RasterFormat::Gif),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Extension used for generated filenames.
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Jpeg => "jpg",
            RasterFormat::Webp => "webp",
            RasterFormat::Gif => "gif",
        }
    }

    pub fn is_lossy(&self) -> bool {
        matches!(self, RasterFormat::Jpeg)
    }
}

/// [`ImageCodec`] over the `image` crate. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, FileOpsError> {
        Ok(image::load_from_memory(bytes)?)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        format: RasterFormat,
        quality: u8,
    ) -> Result<Vec<u8>, FileOpsError> {
        let mut buf = Vec::new();
        match format {
            RasterFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
                DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
            }
            RasterFormat::Png => {
                // PNG is lossless: `quality` has no effect here.
                image.write_with_encoder(PngEncoder::new(&mut buf))?;
            }
            RasterFormat::Webp => {
                let encoder = WebPEncoder::new_lossless(&mut buf);
                DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)?;
            }
            RasterFormat::Gif => {
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Gif)?;
            }
        }
        debug!(?format, quality, bytes = buf.len(), "encoded image");
        Ok(buf)
    }

    fn adjust_brightness(&self, image: DynamicImage, delta: i32) -> DynamicImage {
        // −100..100 maps onto the full 8-bit channel range.
        image.brighten(delta.clamp(-100, 100) * 255 / 100)
    }

    fn adjust_contrast(&self, image: DynamicImage, delta: i32) -> DynamicImage {
        image.adjust_contrast(delta.clamp(-100, 100) as f32)
    }
}
