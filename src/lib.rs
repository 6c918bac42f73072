//! # edgequake-fileops
//!
//! File-conversion backend: recompress and tune images, turn images into
//! PDFs and back, split and merge PDFs. Every output becomes a
//! time-limited downloadable artifact.
//!
//! ## Why this crate?
//!
//! Conversions range from a few milliseconds (re-encoding a thumbnail) to
//! minutes (normalising and rasterising a 40 MiB scan). This crate runs the
//! cheap ones inside the request and queues the expensive ones behind a job
//! id the client polls, with one code path for both. Outputs are published
//! under short-lived URLs and reclaimed automatically.
//!
//! ## Request Lifecycle
//!
//! ```text
//! multipart upload
//!  │
//!  ├─ 1. Intake     stream files to scratch, enforce limits, parse options
//!  ├─ 2. Dispatch   total input bytes ≤ threshold ? inline : queue a job
//!  ├─ 3. Pipeline   normalise (Ghostscript) → split / merge / rasterise (pdfium)
//!  │                or decode → adjust → encode → optimise (image, jpegoptim, pngquant)
//!  ├─ 4. Publish    write blobs, register artifacts, bundle into a ZIP if > 1 output
//!  └─ 5. Respond    payload inline, or {job_id} and later GET /file-job/{id}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_fileops::{server, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .storage_root("/var/lib/fileops")
//!         .public_base_url("https://files.example.com")
//!         .build()?;
//!     let toolkit = server::system_toolkit(&config);
//!     let listener = tokio::net::TcpListener::bind(config.listen).await?;
//!     let service = server::Service::start(config, toolkit)?;
//!     service.serve(listener, server::shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fileops` server binary (clap + anyhow + tracing-subscriber) |
//!
//! ## External Tools
//!
//! | Tool | Used for | Required? |
//! |------|----------|-----------|
//! | pdfium (shared library) | page count, extract, append, rasterise, images → PDF | yes, for PDF operations |
//! | `gs` | normalising PDFs before split/merge | yes, for split/merge |
//! | `jpegoptim`, `pngquant` | post-encode optimisation in compress | no, skipped when missing |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod reaper;
pub mod server;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use error::{ErrorKind, FileOpsError};
pub use jobs::{JobExecutor, WorkerPool};
pub use model::{Artifact, Category, Job, JobKind, JobStatus, Stage};
pub use output::{Dispatch, Download, JobView, ResultPayload};
pub use pipeline::{Operation, PageRange, PageRanges, Toolkit, UploadedFile};
pub use progress::{ChannelProgress, NoopProgress, ProgressSink};
pub use publish::ArtifactPublisher;
pub use reaper::ExpiryReaper;
pub use storage::{ArtifactStore, BlobStore, FsBlobStore, MemoryRepository, Repository};
