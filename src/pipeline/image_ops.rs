//! Image pipelines: compress, tune, format conversion and images → PDF.

use super::{
    blocking, naming, BundlePlan, ConvertTarget, OutputFile, PipelineOutput, Quality, Toolkit,
    TuneOptions, UploadedFile,
};
use crate::engine::{ImageCodec, RasterFormat};
use crate::error::FileOpsError;
use crate::model::{Category, Stage};
use crate::progress::ProgressSink;
use serde_json::{json, Map};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Lossy quality used when a pipeline re-encodes without a quality option.
const REENCODE_QUALITY: u8 = 90;

const SATURATION_WARNING: &str =
    "Saturation adjustment is not supported by the image codec and was not applied";

fn read(path: &Path) -> Result<Vec<u8>, FileOpsError> {
    std::fs::read(path).map_err(|e| FileOpsError::io(path, e))
}

/// Decode `path` and re-encode it as `format`, off the async threads.
async fn reencode(
    codec: &Arc<dyn ImageCodec>,
    path: &Path,
    format: RasterFormat,
    quality: u8,
) -> Result<Vec<u8>, FileOpsError> {
    let codec = codec.clone();
    let path = path.to_path_buf();
    blocking(move || {
        let decoded = codec.decode(&read(&path)?)?;
        codec.encode(&decoded, format, quality)
    })
    .await
}

// ── compress ─────────────────────────────────────────────────────────────

/// Re-encode at `quality`, then run the external optimiser on the written
/// file. The reported size is that of the bytes actually kept: the
/// optimised file when it is smaller, the encoded one otherwise.
pub(super) async fn compress(
    image: UploadedFile,
    quality: Quality,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    let format = image.raster_format()?;
    progress.stage(Stage::Converting);

    let encoded = reencode(&kit.codec, image.path(), format, quality.get()).await?;

    let scratch = kit.scratch_file(format.extension())?;
    tokio::fs::write(&scratch, &encoded)
        .await
        .map_err(|e| FileOpsError::io(scratch.to_path_buf(), e))?;

    let bytes = if kit.optimizer.optimize(&scratch, format, quality.get()).await {
        let optimized = tokio::fs::read(&scratch)
            .await
            .map_err(|e| FileOpsError::io(scratch.to_path_buf(), e))?;
        if !optimized.is_empty() && optimized.len() < encoded.len() {
            optimized
        } else {
            encoded
        }
    } else {
        encoded
    };
    debug!(original = image.size, compressed = bytes.len(), "image compressed");

    let mut extras = Map::new();
    extras.insert("original_size".into(), json!(image.size));
    extras.insert("compressed_size".into(), json!(bytes.len()));

    let filename = naming::plain(&image.original_name, format.extension());
    Ok(PipelineOutput::single(
        OutputFile::new(filename, Category::Compressed, bytes),
        extras,
    ))
}

// ── tune ─────────────────────────────────────────────────────────────────

pub(super) async fn tune(
    image: UploadedFile,
    options: TuneOptions,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    let format = image.raster_format()?;
    progress.stage(Stage::Converting);

    let codec = kit.codec.clone();
    let path = image.path().to_path_buf();
    let bytes = blocking(move || {
        let mut decoded = codec.decode(&read(&path)?)?;
        if let Some(brightness) = options.brightness {
            decoded = codec.adjust_brightness(decoded, brightness.get());
        }
        if let Some(contrast) = options.contrast {
            decoded = codec.adjust_contrast(decoded, contrast.get());
        }
        codec.encode(&decoded, format, REENCODE_QUALITY)
    })
    .await?;

    let mut extras = Map::new();
    if options.saturation.is_some() {
        extras.insert("warnings".into(), json!([SATURATION_WARNING]));
    }

    let filename = naming::plain(&image.original_name, format.extension());
    Ok(PipelineOutput::single(
        OutputFile::new(filename, Category::Tuned, bytes),
        extras,
    ))
}

// ── convert ──────────────────────────────────────────────────────────────

/// Re-encode each image to the target format. Outputs keep input order.
pub(super) async fn convert(
    images: Vec<UploadedFile>,
    target: ConvertTarget,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    let (format, quality, category) = match target {
        ConvertTarget::Png => (RasterFormat::Png, REENCODE_QUALITY, Category::ImgPng),
        ConvertTarget::Jpeg(q) => (RasterFormat::Jpeg, q.get(), Category::ImgJpeg),
    };
    let bundle = BundlePlan::for_outputs(images.len(), &images[0].original_name, category);
    progress.stage(Stage::Converting);

    let mut files = Vec::with_capacity(images.len());
    for image in &images {
        let bytes = reencode(&kit.codec, image.path(), format, quality).await?;
        let filename = naming::plain(&image.original_name, format.extension());
        files.push(OutputFile::new(filename, category, bytes));
    }
    Ok(PipelineOutput::batch(files, "files", bundle))
}

// ── images → pdf ─────────────────────────────────────────────────────────

/// One full-bleed page per image. Each image is written to a scratch PNG
/// only when the engine asks for it, and that file is gone before the next
/// one is written.
pub(super) async fn images_to_pdf(
    images: Vec<UploadedFile>,
    kit: &Toolkit,
    progress: &dyn ProgressSink,
) -> Result<PipelineOutput, FileOpsError> {
    progress.stage(Stage::Converting);

    let sources: Vec<PathBuf> = images.iter().map(|i| i.path().to_path_buf()).collect();
    let codec = kit.codec.clone();
    let engine = kit.pdf.clone();
    let scratch_dir = kit.scratch_dir.clone();

    let (bytes, page_count) = blocking(move || {
        let mut rasters = sources.iter().map(|src| -> Result<_, FileOpsError> {
            let decoded = codec.decode(&read(src)?)?;
            let png = codec.encode(&decoded, RasterFormat::Png, REENCODE_QUALITY)?;
            let raster = super::scratch_file_in(&scratch_dir, "png")?;
            std::fs::write(&raster, png).map_err(|e| FileOpsError::io(raster.to_path_buf(), e))?;
            Ok(raster)
        });
        engine.images_to_pdf(&mut rasters)
    })
    .await?;

    let mut extras = Map::new();
    extras.insert("page_count".into(), json!(page_count));

    let filename = naming::plain(&images[0].original_name, "pdf");
    Ok(PipelineOutput::single(
        OutputFile::new(filename, Category::Pdf, bytes),
        extras,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PdfEngine;
    use crate::pipeline::testkit::{self, pages_of, CountingOptimizer, LinePdf, RewritingOptimizer};
    use crate::pipeline::{run, Adjustment, Layout, Operation, PageRange};
    use crate::progress::NoopProgress;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempPath;

    fn png_bytes() -> Vec<u8> {
        testkit::png_bytes(32, 32)
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    /// `LinePdf`, plus a count of how many scratch files exist whenever a
    /// raster is handed over.
    struct ScratchWatcher {
        scratch: PathBuf,
        most_alive: AtomicUsize,
    }

    impl PdfEngine for ScratchWatcher {
        fn page_count(&self, pdf: &Path) -> Result<usize, FileOpsError> {
            LinePdf.page_count(pdf)
        }

        fn extract_pages(&self, pdf: &Path, range: PageRange) -> Result<Vec<u8>, FileOpsError> {
            LinePdf.extract_pages(pdf, range)
        }

        fn concatenate(&self, pdfs: &[PathBuf]) -> Result<Vec<u8>, FileOpsError> {
            LinePdf.concatenate(pdfs)
        }

        fn rasterize(
            &self,
            pdf: &Path,
            dpi: u32,
            on_page: &mut dyn FnMut(usize, DynamicImage) -> Result<(), FileOpsError>,
        ) -> Result<usize, FileOpsError> {
            LinePdf.rasterize(pdf, dpi, on_page)
        }

        fn images_to_pdf(
            &self,
            rasters: &mut dyn Iterator<Item = Result<TempPath, FileOpsError>>,
        ) -> Result<(Vec<u8>, usize), FileOpsError> {
            let mut watched = rasters.inspect(|_| {
                self.most_alive
                    .fetch_max(scratch_entries(&self.scratch), Ordering::SeqCst);
            });
            LinePdf.images_to_pdf(&mut watched)
        }
    }

    #[tokio::test]
    async fn compress_reports_kept_size() {
        let dir = tempfile::tempdir().unwrap();
        let kit = testkit::toolkit(dir.path(), Arc::new(CountingOptimizer::default()));
        let image = testkit::upload(dir.path(), "Photo One.png", &png_bytes());
        let size = image.size;

        let op = Operation::CompressImage {
            image,
            quality: Quality::new(80).unwrap(),
        };
        let out = run(op, &kit, &NoopProgress).await.unwrap();

        let Layout::Single { extras } = &out.layout else {
            panic!("expected single layout");
        };
        assert_eq!(extras["original_size"], json!(size));
        assert_eq!(extras["compressed_size"], json!(out.files[0].bytes.len()));
        assert!(out.files[0].filename.starts_with("photo-one-"));
        assert!(out.files[0].filename.ends_with(".png"));
        assert_eq!(out.files[0].category, Category::Compressed);
    }

    #[tokio::test]
    async fn compress_keeps_the_optimised_file_when_it_shrank() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = Arc::new(RewritingOptimizer::new(|n| n / 2));
        let kit = testkit::toolkit(dir.path(), optimizer.clone());
        let op = Operation::CompressImage {
            image: testkit::upload(dir.path(), "a.png", &png_bytes()),
            quality: Quality::new(80).unwrap(),
        };
        let out = run(op, &kit, &NoopProgress).await.unwrap();

        let encoded = optimizer.seen();
        let kept = out.files[0].bytes.len();
        assert!(encoded > 0);
        assert_eq!(kept, encoded / 2);
        let Layout::Single { extras } = &out.layout else {
            panic!("expected single layout");
        };
        assert_eq!(extras["compressed_size"], json!(kept));
        assert_eq!(scratch_entries(&kit.scratch_dir), 0);
    }

    #[tokio::test]
    async fn compress_keeps_the_encoded_file_when_the_optimiser_grew_it() {
        let dir = tempfile::tempdir().unwrap();
        let optimizer = Arc::new(RewritingOptimizer::new(|n| n + 100));
        let kit = testkit::toolkit(dir.path(), optimizer.clone());
        let op = Operation::CompressImage {
            image: testkit::upload(dir.path(), "a.png", &png_bytes()),
            quality: Quality::new(80).unwrap(),
        };
        let out = run(op, &kit, &NoopProgress).await.unwrap();
        assert_eq!(out.files[0].bytes.len(), optimizer.seen());
        assert!(!out.files[0].bytes.iter().all(|b| *b == 0x5a));
    }

    #[tokio::test]
    async fn images_to_pdf_adds_one_page_per_image_and_clears_rasters() {
        let dir = tempfile::tempdir().unwrap();
        let mut kit = testkit::toolkit(dir.path(), Arc::new(CountingOptimizer::default()));
        let watcher = Arc::new(ScratchWatcher {
            scratch: kit.scratch_dir.clone(),
            most_alive: AtomicUsize::new(0),
        });
        kit.pdf = watcher.clone() as Arc<dyn PdfEngine>;

        let op = Operation::ImagesToPdf {
            images: vec![
                testkit::upload(dir.path(), "Scan 1.png", &testkit::png_bytes(32, 32)),
                testkit::upload(dir.path(), "scan-2.png", &testkit::png_bytes(16, 8)),
                testkit::upload(dir.path(), "scan-3.png", &testkit::png_bytes(4, 4)),
            ],
        };
        let out = run(op, &kit, &NoopProgress).await.unwrap();

        assert_eq!(
            pages_of(&out.files[0].bytes),
            vec!["image 32x32", "image 16x8", "image 4x4"]
        );
        let Layout::Single { extras } = &out.layout else {
            panic!("expected single layout");
        };
        assert_eq!(extras["page_count"], json!(3));
        assert!(out.files[0].filename.starts_with("scan-1-"));
        assert_eq!(out.files[0].category, Category::Pdf);

        assert_eq!(watcher.most_alive.load(Ordering::SeqCst), 1);
        assert_eq!(scratch_entries(&kit.scratch_dir), 0);
    }

    #[tokio::test]
    async fn tune_warns_about_saturation() {
        let dir = tempfile::tempdir().unwrap();
        let kit = testkit::toolkit(dir.path(), Arc::new(CountingOptimizer::default()));
        let op = Operation::TuneImage {
            image: testkit::upload(dir.path(), "a.png", &png_bytes()),
            options: TuneOptions {
                brightness: Some(Adjustment::new("brightness", 20).unwrap()),
                contrast: None,
                saturation: Some(Adjustment::new("saturation", 50).unwrap()),
            },
        };
        let out = run(op, &kit, &NoopProgress).await.unwrap();
        let Layout::Single { extras } = &out.layout else {
            panic!("expected single layout");
        };
        assert_eq!(extras["warnings"], json!([SATURATION_WARNING]));
    }

    #[tokio::test]
    async fn convert_keeps_order_and_plans_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let kit = testkit::toolkit(dir.path(), Arc::new(CountingOptimizer::default()));
        let op = Operation::ConvertImages {
            images: vec![
                testkit::upload(dir.path(), "first.png", &png_bytes()),
                testkit::upload(dir.path(), "second.png", &png_bytes()),
            ],
            target: ConvertTarget::Jpeg(Quality::new(85).unwrap()),
        };
        let out = run(op, &kit, &NoopProgress).await.unwrap();
        assert!(out.files[0].filename.starts_with("first-"));
        assert!(out.files[1].filename.starts_with("second-"));
        assert!(out.files.iter().all(|f| f.filename.ends_with(".jpg")));
        let Layout::Batch { key, bundle } = &out.layout else {
            panic!("expected batch layout");
        };
        assert_eq!(*key, "files");
        assert!(bundle.as_ref().unwrap().filename.starts_with("first-img-jpeg-"));
    }

    #[tokio::test]
    async fn inputs_are_deleted_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let kit = testkit::toolkit(dir.path(), Arc::new(CountingOptimizer::default()));
        let image = testkit::upload(dir.path(), "a.png", b"not an image");
        let input_path = image.path().to_path_buf();
        let op = Operation::CompressImage {
            image,
            quality: Quality::new(50).unwrap(),
        };
        assert!(run(op, &kit, &NoopProgress).await.is_err());
        assert!(!input_path.exists());
    }
}
