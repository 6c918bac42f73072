//! Error types for the edgequake-fileops library.
//!
//! A single fatal error type, [`FileOpsError`], covers everything an
//! operation can fail with. Variants are grouped by the part of the system
//! that raises them, and [`FileOpsError::kind`] folds them into five
//! [`ErrorKind`]s that callers act on:
//!
//! | Kind | Raised when | HTTP |
//! |------|-------------|------|
//! | `Validation`   | bad option values, malformed page-range syntax, bad upload | 422 |
//! | `Range`        | a page range falls outside the document | 422 |
//! | `ExternalTool` | normalizer/rasterizer exits non-zero or produces no output | 422 |
//! | `NotFound`     | unknown or expired artifact, unknown job | 404 |
//! | `Unexpected`   | anything else (I/O, storage, codec, panics) | 500 |
//!
//! Validation errors are always raised before any side effect: no temp
//! file beyond the upload itself, no job record, no artifact.

use crate::storage::blob::BlobError;
use crate::storage::repository::RepositoryError;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`FileOpsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Range,
    ExternalTool,
    NotFound,
    Unexpected,
}

/// All fatal errors returned by the edgequake-fileops library.
#[derive(Debug, Error)]
pub enum FileOpsError {
    // ── Validation errors ────────────────────────────────────────────────
    /// An option or upload field failed validation.
    #[error("Invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The page-range string does not match `N`, `N-M`, comma separated.
    #[error("Invalid page range format '{input}'. Use numbers and ranges like \"1,3,5-8\".")]
    InvalidPageRange { input: String },

    /// Upload is larger than the configured limit for its field.
    #[error("File '{name}' is {size} bytes; the limit is {limit} bytes")]
    UploadTooLarge { name: String, size: u64, limit: u64 },

    /// Upload content does not match the expected file type.
    #[error("File '{name}' is not a valid {expected}")]
    UnsupportedUpload { name: String, expected: &'static str },

    // ── Range errors ─────────────────────────────────────────────────────
    /// A requested range does not fit the document.
    #[error("Invalid range {range}. This PDF has {page_count} pages.")]
    RangeOutOfBounds { range: String, page_count: usize },

    // ── External tool errors ─────────────────────────────────────────────
    /// An external process exited unsuccessfully or left no output file.
    #[error("{stage} failed: {diagnostic}")]
    ExternalTool {
        stage: &'static str,
        tool: String,
        diagnostic: String,
    },

    /// The PDF engine rejected a document or page.
    #[error("PDF processing failed for '{path}': {detail}")]
    PdfEngine { path: PathBuf, detail: String },

    // ── Not found ────────────────────────────────────────────────────────
    /// No artifact matches, or it has expired.
    #[error("File not found or expired")]
    ArtifactNotFound,

    /// The artifact record exists but its blob is gone.
    #[error("File missing")]
    ArtifactMissing,

    /// No job with this id.
    #[error("Job '{id}' not found")]
    JobNotFound { id: String },

    // ── Storage ──────────────────────────────────────────────────────────
    #[error("Blob storage error: {0}")]
    Blob(#[from] BlobError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to build archive: {0}")]
    Archive(String),

    // ── Codec ────────────────────────────────────────────────────────────
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config ───────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FileOpsError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FileOpsError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FileOpsError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FileOpsError::Validation { .. }
            | FileOpsError::InvalidPageRange { .. }
            | FileOpsError::UploadTooLarge { .. }
            | FileOpsError::UnsupportedUpload { .. }
            | FileOpsError::InvalidConfig(_) => ErrorKind::Validation,
            FileOpsError::RangeOutOfBounds { .. } => ErrorKind::Range,
            FileOpsError::ExternalTool { .. } | FileOpsError::PdfEngine { .. } => {
                ErrorKind::ExternalTool
            }
            FileOpsError::ArtifactNotFound
            | FileOpsError::ArtifactMissing
            | FileOpsError::JobNotFound { .. } => ErrorKind::NotFound,
            FileOpsError::Blob(BlobError::NotFound(_)) => ErrorKind::NotFound,
            FileOpsError::Blob(_)
            | FileOpsError::Repository(_)
            | FileOpsError::Archive(_)
            | FileOpsError::Image(_)
            | FileOpsError::Io { .. }
            | FileOpsError::Internal(_) => ErrorKind::Unexpected,
        }
    }
}
