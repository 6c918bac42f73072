//! External collaborators: image codec, PDF engine, PDF normalizer and
//! image optimizer.
//!
//! Pipelines only see the traits defined here. Default implementations
//! live in the submodules:
//!
//! | Trait | Default | Backing |
//! |-------|---------|---------|
//! | [`ImageCodec`]     | [`codec::RasterCodec`]            | `image` crate |
//! | [`PdfEngine`]      | [`pdfium::PdfiumEngine`]          | pdfium via `pdfium-render` |
//! | [`PdfNormalizer`]  | [`ghostscript::GhostscriptNormalizer`] | `gs` subprocess |
//! | [`ImageOptimizer`] | [`optimizer::CliOptimizer`]       | `jpegoptim` / `pngquant` subprocesses |
//! | [`ProcessRunner`]  | [`process::TokioProcessRunner`]   | `tokio::process` |
//!
//! `ImageCodec` and `PdfEngine` are synchronous and CPU-bound; callers run
//! them inside `tokio::task::spawn_blocking`. Implementations hold no
//! per-call state, so one instance is shared by every request.

pub mod codec;
pub mod ghostscript;
pub mod optimizer;
pub mod pdfium;
pub mod process;

use crate::error::FileOpsError;
use crate::pipeline::ranges::PageRange;
use async_trait::async_trait;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

pub use codec::RasterFormat;
pub use process::ProcessOutput;

/// Decode, adjust and re-encode raster images.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, FileOpsError>;

    /// Encode at `quality` (10–100). Lossless formats ignore `quality`.
    fn encode(
        &self,
        image: &DynamicImage,
        format: RasterFormat,
        quality: u8,
    ) -> Result<Vec<u8>, FileOpsError>;

    /// `delta` in −100..=100.
    fn adjust_brightness(&self, image: DynamicImage, delta: i32) -> DynamicImage;

    /// `delta` in −100..=100.
    fn adjust_contrast(&self, image: DynamicImage, delta: i32) -> DynamicImage;
}

/// Page-level PDF operations.
pub trait PdfEngine: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<usize, FileOpsError>;

    /// New document holding only `range` (1-indexed, inclusive), renumbered
    /// from 1. The range must already be validated against the page count.
    fn extract_pages(&self, pdf: &Path, range: PageRange) -> Result<Vec<u8>, FileOpsError>;

    /// Append every page of every input, in order, into one new document.
    fn concatenate(&self, pdfs: &[PathBuf]) -> Result<Vec<u8>, FileOpsError>;

    /// Rasterize each page at `dpi`, handing pages to `on_page` one at a
    /// time (page numbers start at 1). Returns the number of pages.
    fn rasterize(
        &self,
        pdf: &Path,
        dpi: u32,
        on_page: &mut dyn FnMut(usize, DynamicImage) -> Result<(), FileOpsError>,
    ) -> Result<usize, FileOpsError>;

    /// Build a document with one full-bleed page per raster file. Each
    /// raster is dropped (and so deleted) as soon as its page is placed.
    /// Returns the document bytes and its page count.
    fn images_to_pdf(
        &self,
        rasters: &mut dyn Iterator<Item = Result<TempPath, FileOpsError>>,
    ) -> Result<(Vec<u8>, usize), FileOpsError>;
}

/// Sanitising pass run over every PDF before page-level work.
#[async_trait]
pub trait PdfNormalizer: Send + Sync {
    /// Write a normalised copy of `input` to `output`.
    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), FileOpsError>;
}

/// Best-effort post-encode optimisation of an image file in place.
#[async_trait]
pub trait ImageOptimizer: Send + Sync {
    /// Returns `true` when the optimiser ran and succeeded. Failures are
    /// never fatal to the caller.
    async fn optimize(&self, file: &Path, format: RasterFormat, quality: u8) -> bool;
}

/// Argument-vector subprocess execution (no shell).
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput>;
}
