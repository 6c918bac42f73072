//! [`PdfEngine`] over pdfium via `pdfium-render`.
//!
//! ## Why bind per call?
//!
//! A `Pdfium` handle owns its loaded documents, and documents borrow it.
//! Binding a fresh handle for each operation gives every call its own
//! session with nothing shared between requests; the dynamic library
//! itself is loaded once by the OS and reference-counted.
//!
//! Every method is blocking. Callers run them in `spawn_blocking`.

use super::PdfEngine;
use crate::error::FileOpsError;
use crate::pipeline::ranges::PageRange;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

/// pdfium renders at 72 points per inch.
const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    /// Directory holding the pdfium shared library. `None` binds the
    /// system library.
    library_dir: Option<PathBuf>,
}

impl PdfiumEngine {
    pub fn new(library_dir: Option<PathBuf>) -> Self {
        Self { library_dir }
    }

    fn bind(&self) -> Result<Pdfium, FileOpsError> {
        let bindings = match &self.library_dir {
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| FileOpsError::Internal(format!("Failed to bind pdfium: {e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    /// Quick probe used at startup.
    pub fn check_available(&self) -> Result<(), FileOpsError> {
        self.bind().map(|_| ())
    }
}

fn engine_error(path: &Path, e: impl std::fmt::Debug) -> FileOpsError {
    FileOpsError::PdfEngine {
        path: path.to_path_buf(),
        detail: format!("{e:?}"),
    }
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, FileOpsError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| engine_error(path, e))
}

impl PdfEngine for PdfiumEngine {
    fn page_count(&self, pdf: &Path) -> Result<usize, FileOpsError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, pdf)?;
        Ok(document.pages().len() as usize)
    }

    fn extract_pages(&self, pdf: &Path, range: PageRange) -> Result<Vec<u8>, FileOpsError> {
        let pdfium = self.bind()?;
        let source = open(&pdfium, pdf)?;
        let mut target = pdfium
            .create_new_pdf()
            .map_err(|e| engine_error(pdf, e))?;

        let first = (range.start - 1) as PdfPageIndex;
        let last = (range.end - 1) as PdfPageIndex;
        target
            .pages_mut()
            .copy_page_range_from_document(&source, first..=last, 0)
            .map_err(|e| engine_error(pdf, e))?;

        debug!(path = %pdf.display(), range = %range, "extracted pages");
        target.save_to_bytes().map_err(|e| engine_error(pdf, e))
    }

    fn concatenate(&self, pdfs: &[PathBuf]) -> Result<Vec<u8>, FileOpsError> {
        let pdfium = self.bind()?;
        let mut target = pdfium
            .create_new_pdf()
            .map_err(|e| engine_error(Path::new("<merged>"), e))?;

        for path in pdfs {
            let source = open(&pdfium, path)?;
            target
                .pages_mut()
                .append(&source)
                .map_err(|e| engine_error(path, e))?;
        }

        info!(inputs = pdfs.len(), pages = target.pages().len(), "concatenated pdfs");
        target
            .save_to_bytes()
            .map_err(|e| engine_error(Path::new("<merged>"), e))
    }

    fn rasterize(
        &self,
        pdf: &Path,
        dpi: u32,
        on_page: &mut dyn FnMut(usize, DynamicImage) -> Result<(), FileOpsError>,
    ) -> Result<usize, FileOpsError> {
        let pdfium = self.bind()?;
        let document = open(&pdfium, pdf)?;
        let render_config =
            PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / POINTS_PER_INCH);

        let mut count = 0;
        for (idx, page) in document.pages().iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| engine_error(pdf, e))?;
            let image = bitmap.as_image();
            debug!(
                page = idx + 1,
                width = image.width(),
                height = image.height(),
                "rasterized page"
            );
            on_page(idx + 1, image)?;
            count += 1;
        }
        Ok(count)
    }

    fn images_to_pdf(
        &self,
        rasters: &mut dyn Iterator<Item = Result<TempPath, FileOpsError>>,
    ) -> Result<(Vec<u8>, usize), FileOpsError> {
        let pdfium = self.bind()?;
        let label = Path::new("<images>");
        let mut document = pdfium.create_new_pdf().map_err(|e| engine_error(label, e))?;

        let mut pages = 0;
        for raster in rasters {
            let raster = raster?;
            let image = image::open(&raster)?;
            // One pixel per point: the page is exactly the image.
            let width = PdfPoints::new(image.width() as f32);
            let height = PdfPoints::new(image.height() as f32);

            let mut page = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::Custom(width, height))
                .map_err(|e| engine_error(&raster, e))?;
            page.objects_mut()
                .create_image_object(PdfPoints::ZERO, PdfPoints::ZERO, &image, Some(width), Some(height))
                .map_err(|e| engine_error(&raster, e))?;

            // Raster file is deleted here, before the next one is written.
            drop(raster);
            pages += 1;
        }

        let bytes = document.save_to_bytes().map_err(|e| engine_error(label, e))?;
        Ok((bytes, pages))
    }
}
