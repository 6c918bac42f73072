use super::{ApiError, AppState};
use crate::error::FileOpsError;
use crate::model::{Artifact, JobStatus};
use crate::output::{Dispatch, JobView};
use crate::pipeline::{
    Adjustment, ConvertTarget, Operation, PageRanges, Quality, RasterOptions, TuneOptions,
};
use crate::server::upload::Form;
use crate::storage::BlobError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::Path as FsPath;
use tracing::debug;
use uuid::Uuid;

type ApiResult = Result<Response, ApiError>;

async fn submit(state: &AppState, operation: Operation) -> ApiResult {
    match state.executor.submit(operation).await? {
        Dispatch::Inline(payload) => Ok(Json(payload).into_response()),
        Dispatch::Queued { job_id } => Ok(Json(json!({ "job_id": job_id })).into_response()),
    }
}

fn quality(form: &Form, default: u8) -> Result<Quality, FileOpsError> {
    Quality::new(form.integer("quality")?.unwrap_or(i64::from(default)))
}

fn adjustment(form: &Form, field: &str) -> Result<Option<Adjustment>, FileOpsError> {
    form.integer(field)?
        .map(|v| Adjustment::new(field, v))
        .transpose()
}

// ── Image operations ─────────────────────────────────────────────────────

pub(super) async fn compress_image(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let quality = quality(&form, state.config.default_compress_quality)?;
    let image = form.file("image")?;
    submit(&state, Operation::CompressImage { image, quality }).await
}

pub(super) async fn tune_image(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let options = TuneOptions {
        brightness: adjustment(&form, "brightness")?,
        contrast: adjustment(&form, "contrast")?,
        saturation: adjustment(&form, "saturation")?,
    };
    let image = form.file("image")?;
    submit(&state, Operation::TuneImage { image, options }).await
}

pub(super) async fn images_to_pdf(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let images = form.files("images")?;
    submit(&state, Operation::ImagesToPdf { images }).await
}

pub(super) async fn images_to_png(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let images = form.files("images")?;
    let target = ConvertTarget::Png;
    submit(&state, Operation::ConvertImages { images, target }).await
}

pub(super) async fn images_to_jpeg(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let target = ConvertTarget::Jpeg(quality(&form, state.config.default_jpeg_quality)?);
    let images = form.files("images")?;
    submit(&state, Operation::ConvertImages { images, target }).await
}

// ── PDF operations ───────────────────────────────────────────────────────

pub(super) async fn split_pdf(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let pages = form
        .text("pages")
        .ok_or_else(|| FileOpsError::validation("pages", "The pages field is required."))?;
    let ranges = PageRanges::parse(pages)?;
    let pdf = form.file("pdf")?;
    submit(&state, Operation::SplitPdf { pdf, ranges }).await
}

pub(super) async fn merge_pdfs(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let pdfs = form.files("pdfs")?;
    submit(&state, Operation::MergePdfs { pdfs }).await
}

pub(super) async fn pdfs_to_images(State(state): State<AppState>, multipart: Multipart) -> ApiResult {
    let mut form = state.intake.read(multipart).await?;
    let dpi = form
        .integer("dpi")?
        .unwrap_or(i64::from(state.config.default_dpi));
    let normalize = form.boolean("normalize")?.unwrap_or(false);
    let options = RasterOptions::new(dpi, normalize)?;
    let pdfs = form.files("pdfs")?;
    submit(&state, Operation::PdfToImages { pdfs, options }).await
}

// ── Retrieval ────────────────────────────────────────────────────────────

pub(super) async fn download(
    State(state): State<AppState>,
    Path((category, filename)): Path<(String, String)>,
) -> ApiResult {
    let artifact = state.artifacts.resolve(&category, &filename).await?;
    let bytes = read_blob(&state, &artifact).await?;

    let artifacts = state.artifacts.clone();
    tokio::spawn(async move { artifacts.record_download(&artifact).await });

    debug!(%category, %filename, size = bytes.len(), "serving download");
    Ok(attachment(&filename, bytes))
}

/// Public blob URL. Only live, registered artifacts are served.
pub(super) async fn storage(State(state): State<AppState>, Path(path): Path<String>) -> ApiResult {
    let artifact = state.artifacts.resolve_path(&path).await?;
    let bytes = read_blob(&state, &artifact).await?;
    let content_type = content_type(&path);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

pub(super) async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = Uuid::parse_str(&id).map_err(|_| FileOpsError::JobNotFound { id: id.clone() })?;
    let job = state.executor.job(id).await?;
    let view = JobView::from(&job);
    let status = if job.status == JobStatus::Failed {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    Ok((status, Json(view)).into_response())
}

pub(super) async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ── Helpers ──────────────────────────────────────────────────────────────

async fn read_blob(state: &AppState, artifact: &Artifact) -> Result<Vec<u8>, FileOpsError> {
    state
        .artifacts
        .blobs()
        .get(&artifact.storage_path)
        .await
        .map_err(|e| match e {
            BlobError::NotFound(_) => FileOpsError::ArtifactMissing,
            other => other.into(),
        })
}

fn attachment(filename: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    (
        [
            (header::CONTENT_TYPE, content_type(filename).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

fn content_type(name: &str) -> &'static str {
    let ext = FsPath::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
