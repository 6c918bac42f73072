//! Fakes for pipeline and service tests.
//!
//! Compiled for the crate's own tests and, behind the `test-utils` feature,
//! for the integration tests under `tests/`.
//!
//! [`LinePdf`] treats a "PDF" as a `%PDF-fake` header line followed by one
//! line per page, so page order survives split and merge and can be asserted
//! on without a pdfium install.

use super::{PageRange, Toolkit, UploadedFile};
use crate::engine::codec::RasterCodec;
use crate::engine::{ImageOptimizer, PdfEngine, PdfNormalizer, RasterFormat};
use crate::error::FileOpsError;
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempPath;

const HEADER: &str = "%PDF-fake";

// ── Documents ────────────────────────────────────────────────────────────

pub fn pdf_doc(pages: &[&str]) -> Vec<u8> {
    let mut s = String::from(HEADER);
    for p in pages {
        s.push('\n');
        s.push_str(p);
    }
    s.into_bytes()
}

/// A document whose pages are labelled `{prefix}1..={prefix}{n}`.
pub fn numbered_doc(prefix: &str, n: usize) -> Vec<u8> {
    let labels: Vec<String> = (1..=n).map(|i| format!("{prefix}{i}")).collect();
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    pdf_doc(&refs)
}

pub fn pages_of(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// A gradient PNG, so encoders have something non-trivial to work on.
pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x * 7) as u8, (y * 13) as u8, 128, 255])
    }));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("in-memory PNG encode");
    out.into_inner()
}

// ── Engines ──────────────────────────────────────────────────────────────

fn load(path: &Path) -> Result<Vec<String>, FileOpsError> {
    let bytes = std::fs::read(path).map_err(|e| FileOpsError::io(path, e))?;
    if !bytes.starts_with(b"%PDF") {
        return Err(FileOpsError::PdfEngine {
            path: path.to_path_buf(),
            detail: "not a pdf".into(),
        });
    }
    Ok(pages_of(&bytes))
}

pub struct LinePdf;

impl PdfEngine for LinePdf {
    fn page_count(&self, pdf: &Path) -> Result<usize, FileOpsError> {
        Ok(load(pdf)?.len())
    }

    fn extract_pages(&self, pdf: &Path, range: PageRange) -> Result<Vec<u8>, FileOpsError> {
        let pages = load(pdf)?;
        let slice: Vec<&str> = pages[range.start - 1..range.end]
            .iter()
            .map(String::as_str)
            .collect();
        Ok(pdf_doc(&slice))
    }

    fn concatenate(&self, pdfs: &[PathBuf]) -> Result<Vec<u8>, FileOpsError> {
        let mut all = Vec::new();
        for p in pdfs {
            all.extend(load(p)?);
        }
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        Ok(pdf_doc(&refs))
    }

    fn rasterize(
        &self,
        pdf: &Path,
        _dpi: u32,
        on_page: &mut dyn FnMut(usize, DynamicImage) -> Result<(), FileOpsError>,
    ) -> Result<usize, FileOpsError> {
        let pages = load(pdf)?;
        for n in 1..=pages.len() {
            on_page(
                n,
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([n as u8, 0, 0, 255]))),
            )?;
        }
        Ok(pages.len())
    }

    /// One `image WxH` line per raster. Each raster is dropped, and so
    /// deleted, before the next one is requested.
    fn images_to_pdf(
        &self,
        rasters: &mut dyn Iterator<Item = Result<TempPath, FileOpsError>>,
    ) -> Result<(Vec<u8>, usize), FileOpsError> {
        let mut pages = Vec::new();
        for raster in rasters {
            let raster = raster?;
            let img = image::open(&raster)?;
            pages.push(format!("image {}x{}", img.width(), img.height()));
        }
        let refs: Vec<&str> = pages.iter().map(String::as_str).collect();
        Ok((pdf_doc(&refs), pages.len()))
    }
}

// ── Normalizers ──────────────────────────────────────────────────────────

/// Copies the input verbatim and counts invocations.
#[derive(Default)]
pub struct CopyNormalizer {
    pub calls: AtomicUsize,
}

impl CopyNormalizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PdfNormalizer for CopyNormalizer {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), FileOpsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(input, output)
            .await
            .map(|_| ())
            .map_err(|e| FileOpsError::io(input, e))
    }
}

/// Behaves like Ghostscript exiting with status 1.
pub struct FailingNormalizer;

#[async_trait]
impl PdfNormalizer for FailingNormalizer {
    async fn normalize(&self, _input: &Path, _output: &Path) -> Result<(), FileOpsError> {
        Err(FileOpsError::ExternalTool {
            stage: "Normalization",
            tool: "gs".into(),
            diagnostic: "Error: /syntaxerror in --token--".into(),
        })
    }
}

pub struct PanickingNormalizer;

#[async_trait]
impl PdfNormalizer for PanickingNormalizer {
    async fn normalize(&self, _input: &Path, _output: &Path) -> Result<(), FileOpsError> {
        panic!("normalizer exploded");
    }
}

// ── Optimizers ───────────────────────────────────────────────────────────

/// Never touches the file; counts invocations.
#[derive(Default)]
pub struct CountingOptimizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ImageOptimizer for CountingOptimizer {
    async fn optimize(&self, _file: &Path, _format: RasterFormat, _quality: u8) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// Rewrites the file as `resize(len)` filler bytes and reports success.
/// Records the size it found, which is the encoder's output size.
pub struct RewritingOptimizer {
    resize: fn(usize) -> usize,
    pub seen: AtomicUsize,
}

impl RewritingOptimizer {
    pub fn new(resize: fn(usize) -> usize) -> Self {
        Self {
            resize,
            seen: AtomicUsize::new(0),
        }
    }

    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageOptimizer for RewritingOptimizer {
    async fn optimize(&self, file: &Path, _format: RasterFormat, _quality: u8) -> bool {
        let Ok(before) = tokio::fs::read(file).await else {
            return false;
        };
        self.seen.store(before.len(), Ordering::SeqCst);
        tokio::fs::write(file, vec![0x5a; (self.resize)(before.len())])
            .await
            .is_ok()
    }
}

// ── Assembly ─────────────────────────────────────────────────────────────

/// Fakes everywhere except the real `image` codec, with a copying
/// normalizer.
pub fn toolkit(dir: &Path, optimizer: Arc<dyn ImageOptimizer>) -> Toolkit {
    toolkit_with(dir, Arc::new(CopyNormalizer::default()), optimizer)
}

pub fn toolkit_with(
    dir: &Path,
    normalizer: Arc<dyn PdfNormalizer>,
    optimizer: Arc<dyn ImageOptimizer>,
) -> Toolkit {
    Toolkit {
        codec: Arc::new(RasterCodec),
        pdf: Arc::new(LinePdf),
        normalizer,
        optimizer,
        scratch_dir: dir.join("scratch"),
    }
}

/// An upload of `bytes` held in a temp file under `dir`.
pub fn upload(dir: &Path, name: &str, bytes: &[u8]) -> UploadedFile {
    let mut file = tempfile::NamedTempFile::new_in(dir).expect("temp upload");
    file.write_all(bytes).expect("write temp upload");
    UploadedFile::new(name, file.into_temp_path(), bytes.len() as u64)
}
