//! PDF pipelines: split, merge and rasterise.
//!
//! Every input goes through the normaliser before the engine opens it
//! (always for split and merge, on request for rasterisation). All inputs
//! are normalised before any page-level work starts, so the reported stage
//! moves strictly forward.

use super::{
    blocking, naming, BundlePlan, OutputFile, OutputMeta, PageRanges, PipelineOutput,
    RasterOptions, Toolkit, UploadedFile,
};
use crate::engine::RasterFormat;
use crate::error::FileOpsError;
use crate::model::{Category, Stage};
use crate::progress::ProgressSink;
use serde_json::{json, Map};
use std::path::PathBuf;
use tempfile::TempPath;
use tracing::debug;

/// Normalise one input into a scratch file owned by the caller.
async fn normalize(kit: &Toolkit, input: &UploadedFile) -> Result<TempPath, FileOpsError> {
    let output = kit.scratch_file("pdf")?;
    kit.normalizer.normalize(input.path(), &output).await?;
    debug!(source = %input.original_name, "input normalized");
    Ok(output)
}

async fn normalize_all(
    kit: &Toolkit,
    inputs: &[UploadedFile],
) -> Result<Vec<TempPath>, FileOpsError> {
    let mut normalized = Vec::with_capacity(inputs.len());
    for input in inputs {
        normalized.push(normalize(kit, input).await?);
    }
    Ok(normalized)
}

// ── split ────────────────────────────────────────────────────────────────

/// One output PDF per requested range, in request order.
///
/// Every range is checked against the normalised page count before any
/// page is extracted; a single bad range fails the whole request.
pub(super) async fn split(
    pdf: UploadedFile,
    ranges: PageRanges,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    let bundle = BundlePlan::for_outputs(ranges.len(), &pdf.original_name, Category::Split);

    progress.stage(Stage::Normalizing);
    let normalized = normalize(kit, &pdf).await?;

    progress.stage(Stage::Splitting);
    let engine = kit.pdf.clone();
    let path = normalized.to_path_buf();
    let wanted = ranges.clone();
    let extracted = blocking(move || {
        let page_count = engine.page_count(&path)?;
        wanted.validate(page_count)?;
        wanted
            .iter()
            .map(|range| Ok((*range, engine.extract_pages(&path, *range)?)))
            .collect::<Result<Vec<_>, FileOpsError>>()
    })
    .await?;

    let files = extracted
        .into_iter()
        .map(|(range, bytes)| {
            let tag = format!("pages-{}-{}", range.start, range.end);
            OutputFile::new(
                naming::tagged(&pdf.original_name, &tag, "pdf"),
                Category::Split,
                bytes,
            )
            .with_meta(OutputMeta {
                range: Some(range.label()),
                ..OutputMeta::default()
            })
        })
        .collect();

    Ok(PipelineOutput::batch(files, "split_pdfs", bundle))
}

// ── merge ────────────────────────────────────────────────────────────────

/// All pages of all inputs, in input order, as one document.
pub(super) async fn merge(
    pdfs: Vec<UploadedFile>,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    progress.stage(Stage::Normalizing);
    let normalized = normalize_all(kit, &pdfs).await?;

    progress.stage(Stage::Merging);
    let engine = kit.pdf.clone();
    let paths: Vec<PathBuf> = normalized.iter().map(|p| p.to_path_buf()).collect();
    let (bytes, page_count) = blocking(move || {
        let mut page_count = 0;
        for p in &paths {
            page_count += engine.page_count(p)?;
        }
        Ok((engine.concatenate(&paths)?, page_count))
    })
    .await?;

    let mut extras = Map::new();
    extras.insert("page_count".into(), json!(page_count));

    let filename = naming::tagged(&pdfs[0].original_name, "merged", "pdf");
    Ok(PipelineOutput::single(
        OutputFile::new(filename, Category::Merged, bytes),
        extras,
    ))
}

// ── pdf → images ─────────────────────────────────────────────────────────

/// One PNG per page per input, collected across inputs in input order.
pub(super) async fn to_images(
    pdfs: Vec<UploadedFile>,
    options: RasterOptions,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    // Keeps normalised copies alive until rasterisation is done.
    let normalized = if options.normalize() {
        progress.stage(Stage::Normalizing);
        normalize_all(kit, &pdfs).await?
    } else {
        Vec::new()
    };
    let sources: Vec<(String, PathBuf)> = if normalized.is_empty() {
        pdfs.iter()
            .map(|p| (p.original_name.clone(), p.path().to_path_buf()))
            .collect()
    } else {
        pdfs.iter()
            .zip(&normalized)
            .map(|(p, n)| (p.original_name.clone(), n.to_path_buf()))
            .collect()
    };

    progress.stage(Stage::Converting);
    let engine = kit.pdf.clone();
    let codec = kit.codec.clone();
    let dpi = options.dpi();
    let first = pdfs[0].original_name.clone();

    let (files, bundle) = blocking(move || {
        let mut expected = 0;
        for (_, path) in &sources {
            expected += engine.page_count(path)?;
        }
        let bundle = BundlePlan::for_outputs(expected, &first, Category::PdfImages);

        let mut files = Vec::with_capacity(expected);
        for (name, path) in &sources {
            engine.rasterize(path, dpi, &mut |page, image| {
                let bytes = codec.encode(&image, RasterFormat::Png, 100)?;
                let filename = naming::tagged(name, &format!("page-{page}"), "png");
                files.push(
                    OutputFile::new(filename, Category::PdfImages, bytes).with_meta(OutputMeta {
                        page: Some(page),
                        source: Some(name.clone()),
                        ..OutputMeta::default()
                    }),
                );
                Ok(())
            })?;
        }
        Ok((files, bundle))
    })
    .await?;

    Ok(PipelineOutput::batch(files, "files", bundle))
}
