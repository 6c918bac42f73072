//! Conversion pipelines: one per operation.
//!
//! A pipeline is a function of already-validated, already-persisted inputs
//! plus typed options. It returns output files and a [`Layout`] describing
//! how the result payload should be shaped. Pipelines never touch HTTP,
//! the blob store or job records; publishing happens afterwards in
//! [`crate::publish`], so a failing pipeline leaves no artifacts behind.
//!
//! ## Stage sequence
//!
//! ```text
//! compress / tune / convert / images→pdf : converting
//! split                                  : normalizing → splitting
//! merge                                  : normalizing → merging
//! pdf→images                             : [normalizing →] converting
//! ```
//!
//! `zipping` is reported by the publisher when a bundle is written.
//!
//! Codec and PDF-engine calls are blocking and always run through
//! [`blocking`], which moves them onto tokio's blocking pool.

mod image_ops;
pub mod naming;
pub mod options;
mod pdf_ops;
pub mod ranges;
#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use options::{Adjustment, ConvertTarget, Quality, RasterOptions, TuneOptions, UploadedFile};
pub use ranges::{PageRange, PageRanges};

use crate::engine::{ImageCodec, ImageOptimizer, PdfEngine, PdfNormalizer};
use crate::error::FileOpsError;
use crate::model::{Category, JobKind};
use crate::progress::ProgressSink;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{info, instrument};

// ── Operations ───────────────────────────────────────────────────────────

/// One requested conversion with its inputs and options.
#[derive(Debug)]
pub enum Operation {
    CompressImage {
        image: UploadedFile,
        quality: Quality,
    },
    TuneImage {
        image: UploadedFile,
        options: TuneOptions,
    },
    ImagesToPdf {
        images: Vec<UploadedFile>,
    },
    ConvertImages {
        images: Vec<UploadedFile>,
        target: ConvertTarget,
    },
    SplitPdf {
        pdf: UploadedFile,
        ranges: PageRanges,
    },
    MergePdfs {
        pdfs: Vec<UploadedFile>,
    },
    PdfToImages {
        pdfs: Vec<UploadedFile>,
        options: RasterOptions,
    },
}

impl Operation {
    pub fn kind(&self) -> JobKind {
        match self {
            Operation::CompressImage { .. } => JobKind::ImageCompress,
            Operation::TuneImage { .. } => JobKind::ImageTune,
            Operation::ImagesToPdf { .. } => JobKind::ImageToPdf,
            Operation::ConvertImages {
                target: ConvertTarget::Png,
                ..
            } => JobKind::ImageToPng,
            Operation::ConvertImages {
                target: ConvertTarget::Jpeg(_),
                ..
            } => JobKind::ImageToJpeg,
            Operation::SplitPdf { .. } => JobKind::PdfSplit,
            Operation::MergePdfs { .. } => JobKind::PdfMerge,
            Operation::PdfToImages { .. } => JobKind::PdfToImages,
        }
    }

    pub fn inputs(&self) -> &[UploadedFile] {
        match self {
            Operation::CompressImage { image, .. } | Operation::TuneImage { image, .. } => {
                std::slice::from_ref(image)
            }
            Operation::SplitPdf { pdf, .. } => std::slice::from_ref(pdf),
            Operation::ImagesToPdf { images } | Operation::ConvertImages { images, .. } => images,
            Operation::MergePdfs { pdfs } | Operation::PdfToImages { pdfs, .. } => pdfs,
        }
    }

    /// Inline/background cost signal: total input bytes.
    pub fn cost_bytes(&self) -> u64 {
        self.inputs().iter().map(|f| f.size).sum()
    }
}

// ── Collaborators ────────────────────────────────────────────────────────

/// Everything a pipeline may call out to.
#[derive(Clone)]
pub struct Toolkit {
    pub codec: Arc<dyn ImageCodec>,
    pub pdf: Arc<dyn PdfEngine>,
    pub normalizer: Arc<dyn PdfNormalizer>,
    pub optimizer: Arc<dyn ImageOptimizer>,
    /// Directory for intermediate files (normalised PDFs, rasters).
    pub scratch_dir: PathBuf,
}

impl Toolkit {
    /// A fresh, empty scratch file with the given extension. Deleted on drop.
    pub fn scratch_file(&self, ext: &str) -> Result<TempPath, FileOpsError> {
        scratch_file_in(&self.scratch_dir, ext)
    }
}

pub(crate) fn scratch_file_in(dir: &std::path::Path, ext: &str) -> Result<TempPath, FileOpsError> {
    std::fs::create_dir_all(dir).map_err(|e| FileOpsError::io(dir, e))?;
    tempfile::Builder::new()
        .prefix("fileops-")
        .suffix(&format!(".{ext}"))
        .tempfile_in(dir)
        .map(|f| f.into_temp_path())
        .map_err(|e| FileOpsError::io(dir, e))
}

// ── Outputs ──────────────────────────────────────────────────────────────

/// Per-entry descriptors echoed into batch payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputMeta {
    pub range: Option<String>,
    pub page: Option<usize>,
    pub source: Option<String>,
}

/// One generated file, not yet stored.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub filename: String,
    pub category: Category,
    pub bytes: Vec<u8>,
    pub meta: OutputMeta,
}

impl OutputFile {
    pub fn new(filename: String, category: Category, bytes: Vec<u8>) -> Self {
        Self {
            filename,
            category,
            bytes,
            meta: OutputMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: OutputMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Name and category of the ZIP bundle, decided before per-item work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePlan {
    pub filename: String,
    pub category: Category,
}

impl BundlePlan {
    /// A bundle is planned only when more than one output is expected.
    pub fn for_outputs(expected: usize, first_input: &str, category: Category) -> Option<Self> {
        (expected > 1).then(|| Self {
            filename: naming::tagged(first_input, category.as_str(), "zip"),
            category,
        })
    }
}

/// Shape of the result payload.
#[derive(Debug, Clone)]
pub enum Layout {
    /// Exactly one file; `extras` are merged into the top-level payload.
    Single {
        extras: serde_json::Map<String, serde_json::Value>,
    },
    /// A list of files under `key`, optionally bundled.
    Batch {
        key: &'static str,
        bundle: Option<BundlePlan>,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub files: Vec<OutputFile>,
    pub layout: Layout,
}

impl PipelineOutput {
    pub fn single(file: OutputFile, extras: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            files: vec![file],
            layout: Layout::Single { extras },
        }
    }

    pub fn batch(files: Vec<OutputFile>, key: &'static str, bundle: Option<BundlePlan>) -> Self {
        Self {
            files,
            layout: Layout::Batch { key, bundle },
        }
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────

/// Run one operation to completion.
///
/// Input temp files are owned by `op` and deleted when it is dropped at the
/// end of this call, whatever the outcome.
#[instrument(skip_all, fields(kind = op.kind().as_str(), inputs = op.inputs().len()))]
pub async fn run(
    op: Operation,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    if op.inputs().is_empty() {
        return Err(FileOpsError::validation("files", "at least one file is required"));
    }

    let output = match op {
        Operation::CompressImage { image, quality } => {
            image_ops::compress(image, quality, kit, progress).await
        }
        Operation::TuneImage { image, options } => image_ops::tune(image, options, kit, progress).await,
        Operation::ImagesToPdf { images } => image_ops::images_to_pdf(images, kit, progress).await,
        Operation::ConvertImages { images, target } => {
            image_ops::convert(images, target, kit, progress).await
        }
        Operation::SplitPdf { pdf, ranges } => pdf_ops::split(pdf, ranges, kit, progress).await,
        Operation::MergePdfs { pdfs } => pdf_ops::merge(pdfs, kit, progress).await,
        Operation::PdfToImages { pdfs, options } => {
            pdf_ops::to_images(pdfs, options, kit, progress).await
        }
    }?;

    info!(outputs = output.files.len(), "pipeline finished");
    Ok(output)
}

/// Run blocking codec or engine work off the async worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, FileOpsError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FileOpsError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FileOpsError::Internal(format!("Blocking task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, size: u64) -> UploadedFile {
        let tmp = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        UploadedFile::new(name, tmp, size)
    }

    #[test]
    fn cost_is_summed_over_inputs() {
        let op = Operation::MergePdfs {
            pdfs: vec![upload("a.pdf", 3_000_000), upload("b.pdf", 2_500_000)],
        };
        assert_eq!(op.cost_bytes(), 5_500_000);
        assert_eq!(op.kind(), JobKind::PdfMerge);
    }

    #[test]
    fn conversion_kind_follows_target() {
        let op = Operation::ConvertImages {
            images: vec![upload("a.png", 1)],
            target: ConvertTarget::Jpeg(Quality::new(85).unwrap()),
        };
        assert_eq!(op.kind(), JobKind::ImageToJpeg);
    }

    #[test]
    fn bundle_planned_only_for_multiple_outputs() {
        assert!(BundlePlan::for_outputs(1, "a.pdf", Category::Split).is_none());
        let plan = BundlePlan::for_outputs(2, "Report.pdf", Category::Split).unwrap();
        assert!(plan.filename.starts_with("report-split-"));
        assert!(plan.filename.ends_with(".zip"));
    }

    #[test]
    fn scratch_files_are_deleted_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_file_in(&dir.path().join("nested"), "pdf").unwrap();
        let kept = path.to_path_buf();
        assert!(kept.exists());
        assert_eq!(kept.extension().unwrap(), "pdf");
        drop(path);
        assert!(!kept.exists());
    }
}
