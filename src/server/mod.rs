//! HTTP surface and process wiring.
//!
//! ## Routes
//!
//! | Method | Path                             | Operation |
//! |--------|----------------------------------|-----------|
//! | POST   | `/image/compress`                | re-encode + optimise one image |
//! | POST   | `/image/tune`                    | brightness / contrast |
//! | POST   | `/image/convert-to-pdf`          | one page per image |
//! | POST   | `/image/convert-to-png`          | re-encode batch to PNG |
//! | POST   | `/image/convert-to-jpeg`         | re-encode batch to JPEG |
//! | POST   | `/pdf/split`                     | one PDF per page range |
//! | POST   | `/pdf/merge`                     | concatenate in upload order |
//! | POST   | `/pdf/convert-to-img`            | one PNG per page |
//! | GET    | `/download/{category}/{filename}`| stream an artifact as attachment |
//! | GET    | `/file-job/{id}`                 | job status |
//! | GET    | `/storage/{*path}`               | blob of a live artifact |
//! | GET    | `/healthz`                       | liveness |
//!
//! Every POST answers either with the result payload (inline) or with
//! `{"job_id": ...}` (background), depending on the total upload size.
//!
//! ## Error mapping
//!
//! | Kind | Status | Body |
//! |------|--------|------|
//! | Validation, Range, ExternalTool | 422 | `{"success": false, "message": ...}` |
//! | NotFound | 404 | `{"error": ...}` |
//! | Unexpected | 500 | `{"success": false, "message": ...}`, details only in logs |

mod handlers;
pub mod upload;

use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::engine::ghostscript::GhostscriptNormalizer;
use crate::engine::optimizer::CliOptimizer;
use crate::engine::pdfium::PdfiumEngine;
use crate::engine::process::TokioProcessRunner;
use crate::engine::codec::RasterCodec;
use crate::error::{ErrorKind, FileOpsError};
use crate::jobs::{JobExecutor, WorkerPool};
use crate::pipeline::Toolkit;
use crate::publish::ArtifactPublisher;
use crate::reaper::{ExpiryReaper, ReaperHandle};
use crate::storage::{ArtifactStore, FsBlobStore, MemoryRepository, Repository};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use upload::Intake;

// ── State ────────────────────────────────────────────────────────────────

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub executor: JobExecutor,
    pub artifacts: ArtifactStore,
    pub intake: Arc<Intake>,
    pub config: Arc<ServiceConfig>,
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes();
    Router::new()
        .route("/image/compress", post(handlers::compress_image))
        .route("/image/tune", post(handlers::tune_image))
        .route("/image/convert-to-pdf", post(handlers::images_to_pdf))
        .route("/image/convert-to-png", post(handlers::images_to_png))
        .route("/image/convert-to-jpeg", post(handlers::images_to_jpeg))
        .route("/pdf/split", post(handlers::split_pdf))
        .route("/pdf/merge", post(handlers::merge_pdfs))
        .route("/pdf/convert-to-img", post(handlers::pdfs_to_images))
        .route("/download/{category}/{filename}", get(handlers::download))
        .route("/file-job/{id}", get(handlers::job_status))
        .route("/storage/{*path}", get(handlers::storage))
        .route("/healthz", get(handlers::healthz))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────────────

/// A [`FileOpsError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub FileOpsError);

impl From<FileOpsError> for ApiError {
    fn from(e: FileOpsError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = self.0;
        match e.kind() {
            ErrorKind::Validation | ErrorKind::Range | ErrorKind::ExternalTool => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "success": false, "message": e.to_string() })),
            )
                .into_response(),
            ErrorKind::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
            ErrorKind::Unexpected => {
                error!(error = %e, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "message": "Processing failed unexpectedly" })),
                )
                    .into_response()
            }
        }
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

/// Production collaborators: `image` codec, pdfium, Ghostscript and the
/// jpegoptim/pngquant optimisers, all spawning through tokio.
pub fn system_toolkit(config: &ServiceConfig) -> Toolkit {
    let runner = Arc::new(TokioProcessRunner);
    Toolkit {
        codec: Arc::new(RasterCodec),
        pdf: Arc::new(PdfiumEngine::new(config.pdfium_lib_dir.clone())),
        normalizer: Arc::new(GhostscriptNormalizer::new(
            runner.clone(),
            config.ghostscript.clone(),
        )),
        optimizer: Arc::new(CliOptimizer::new(
            runner,
            config.jpegoptim.clone(),
            config.pngquant.clone(),
        )),
        scratch_dir: config.scratch_dir.clone(),
    }
}

/// A running service: handler state plus its background tasks.
pub struct Service {
    state: AppState,
    workers: WorkerPool,
    reaper: ReaperHandle,
}

impl Service {
    /// Start with an in-memory repository and the wall clock.
    pub fn start(config: ServiceConfig, toolkit: Toolkit) -> Result<Self, FileOpsError> {
        Self::start_with(
            config,
            toolkit,
            Arc::new(MemoryRepository::new()),
            Arc::new(SystemClock),
        )
    }

    /// Start the worker pool and the reaper. Must be called inside a tokio
    /// runtime.
    pub fn start_with(
        config: ServiceConfig,
        toolkit: Toolkit,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FileOpsError> {
        std::fs::create_dir_all(&config.storage_root)
            .map_err(|e| FileOpsError::io(&config.storage_root, e))?;
        std::fs::create_dir_all(&config.scratch_dir)
            .map_err(|e| FileOpsError::io(&config.scratch_dir, e))?;

        let ttl = chrono::Duration::from_std(config.artifact_ttl)
            .map_err(|e| FileOpsError::InvalidConfig(format!("artifact TTL: {e}")))?;
        let blobs = Arc::new(FsBlobStore::new(
            &config.storage_root,
            config.public_base_url.clone(),
        ));
        let artifacts = ArtifactStore::new(repository.clone(), blobs, clock.clone(), ttl);
        let publisher = ArtifactPublisher::new(artifacts.clone(), config.public_base_url.clone());

        let (executor, queue) = JobExecutor::new(
            repository.clone(),
            clock.clone(),
            toolkit,
            publisher,
            config.inline_threshold_bytes,
        );
        let workers = WorkerPool::start(executor.clone(), queue, config.workers);

        let reaper = ExpiryReaper::new(artifacts.clone(), repository, clock, config.job_retention)?
            .with_intervals(config.artifact_sweep_interval, config.job_sweep_interval)
            .start();

        let intake = Intake {
            scratch_dir: config.scratch_dir.clone(),
            max_image_bytes: config.max_image_bytes,
            max_pdf_bytes: config.max_pdf_bytes,
        };
        let state = AppState {
            executor,
            artifacts,
            intake: Arc::new(intake),
            config: Arc::new(config),
        };

        Ok(Self {
            state,
            workers,
            reaper,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then drain the job queue and stop
    /// the reaper.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), FileOpsError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| FileOpsError::Internal(format!("listener has no address: {e}")))?;
        info!(%local_addr, "fileops server listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        self.shutdown().await;
        served.map_err(|e| FileOpsError::Internal(format!("server error: {e}")))
    }

    /// Stop background tasks. Queued jobs still run to completion.
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
        self.reaper.shutdown().await;
        info!("fileops service stopped");
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to capture SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received; shutting down"),
        _ = sigterm => info!("SIGTERM received; shutting down"),
    }
}
