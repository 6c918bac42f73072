//! Typed, pre-validated inputs and per-operation options.
//!
//! Every bound is checked when the value is constructed, at the request
//! boundary. Pipelines receive only values that are already in range.

use crate::engine::RasterFormat;
use crate::error::FileOpsError;
use std::path::Path;
use tempfile::TempPath;

/// An upload persisted to scratch storage.
///
/// The file is deleted when this value is dropped, on every exit path of
/// whichever pipeline invocation owns it.
#[derive(Debug)]
pub struct UploadedFile {
    /// Client-supplied filename, used for output naming only.
    pub original_name: String,
    pub path: TempPath,
    pub size: u64,
}

impl UploadedFile {
    pub fn new(original_name: impl Into<String>, path: TempPath, size: u64) -> Self {
        Self {
            original_name: original_name.into(),
            path,
            size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raster format implied by the original filename.
    pub fn raster_format(&self) -> Result<RasterFormat, FileOpsError> {
        RasterFormat::from_path(Path::new(&self.original_name)).ok_or_else(|| {
            FileOpsError::UnsupportedUpload {
                name: self.original_name.clone(),
                expected: "image (png, jpg, jpeg, webp, gif)",
            }
        })
    }
}

/// Encode quality, 10–100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: i64 = 10;
    pub const MAX: i64 = 100;

    pub fn new(value: i64) -> Result<Self, FileOpsError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(FileOpsError::validation(
                "quality",
                format!("must be between {} and {}, got {value}", Self::MIN, Self::MAX),
            ));
        }
        Ok(Self(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// A tone adjustment, −100..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment(i32);

impl Adjustment {
    pub fn new(field: &str, value: i64) -> Result<Self, FileOpsError> {
        if !(-100..=100).contains(&value) {
            return Err(FileOpsError::validation(
                field,
                format!("must be between -100 and 100, got {value}"),
            ));
        }
        Ok(Self(value as i32))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TuneOptions {
    pub brightness: Option<Adjustment>,
    pub contrast: Option<Adjustment>,
    /// Accepted but not applied: the codec has no saturation control.
    pub saturation: Option<Adjustment>,
}

/// Target of an image format conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    Png,
    Jpeg(Quality),
}

/// PDF rasterisation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    dpi: u32,
    normalize: bool,
}

impl RasterOptions {
    pub const MIN_DPI: i64 = 72;
    pub const MAX_DPI: i64 = 600;
    pub const DEFAULT_DPI: u32 = 150;

    pub fn new(dpi: i64, normalize: bool) -> Result<Self, FileOpsError> {
        if !(Self::MIN_DPI..=Self::MAX_DPI).contains(&dpi) {
            return Err(FileOpsError::validation(
                "dpi",
                format!(
                    "must be between {} and {}, got {dpi}",
                    Self::MIN_DPI,
                    Self::MAX_DPI
                ),
            ));
        }
        Ok(Self {
            dpi: dpi as u32,
            normalize,
        })
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            dpi: Self::DEFAULT_DPI,
            normalize: false,
        }
    }
}
