//! Server binary for edgequake-fileops.
//!
//! A thin shim over the library crate that maps CLI flags and `FILEOPS_*`
//! environment variables to `ServiceConfig` and serves until Ctrl+C or
//! SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_fileops::engine::pdfium::PdfiumEngine;
use edgequake_fileops::server::{self, Service};
use edgequake_fileops::ServiceConfig;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default address with storage under ./storage
  fileops

  # Public deployment behind a reverse proxy
  fileops --listen 0.0.0.0:8080 --storage-root /var/lib/fileops \
          --public-base-url https://files.example.com

  # Queue everything above 1 MiB, four workers
  fileops --inline-threshold-bytes 1048576 --workers 4

EXTERNAL TOOLS:
  pdfium      shared library, bound at startup (--pdfium-lib-dir or system path)
  gs          Ghostscript, normalises PDFs before split and merge
  jpegoptim   optional, post-encode JPEG optimisation
  pngquant    optional, post-encode PNG optimisation

ENVIRONMENT VARIABLES:
  Every flag can also be set as FILEOPS_<FLAG> (e.g. FILEOPS_WORKERS=4).
  RUST_LOG overrides the log filter chosen by --verbose / --quiet.
"#;

/// File-conversion server with background jobs and expiring downloads.
#[derive(Parser, Debug)]
#[command(
    name = "fileops",
    version,
    about = "File-conversion server with background jobs and expiring downloads",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "FILEOPS_LISTEN", default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Root directory of the blob store.
    #[arg(long, env = "FILEOPS_STORAGE_ROOT", default_value = "./storage")]
    storage_root: PathBuf,

    /// Directory for uploads and intermediate files [default: <storage-root>/temp].
    #[arg(long, env = "FILEOPS_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Base URL used in every returned link.
    #[arg(long, env = "FILEOPS_PUBLIC_BASE_URL", default_value = "http://127.0.0.1:8080")]
    public_base_url: String,

    /// Requests with at most this many input bytes run inline.
    #[arg(long, env = "FILEOPS_INLINE_THRESHOLD_BYTES", default_value_t = 5 * 1024 * 1024)]
    inline_threshold_bytes: u64,

    /// Artifact lifetime in seconds.
    #[arg(long, env = "FILEOPS_ARTIFACT_TTL_SECS", default_value_t = 2 * 3600)]
    artifact_ttl_secs: u64,

    /// Job record retention in seconds.
    #[arg(long, env = "FILEOPS_JOB_RETENTION_SECS", default_value_t = 24 * 3600)]
    job_retention_secs: u64,

    /// Seconds between expired-artifact sweeps.
    #[arg(long, env = "FILEOPS_ARTIFACT_SWEEP_SECS", default_value_t = 3600)]
    artifact_sweep_secs: u64,

    /// Seconds between stale-job sweeps.
    #[arg(long, env = "FILEOPS_JOB_SWEEP_SECS", default_value_t = 24 * 3600)]
    job_sweep_secs: u64,

    /// Number of background workers.
    #[arg(short, long, env = "FILEOPS_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Per-file image upload limit in bytes.
    #[arg(long, env = "FILEOPS_MAX_IMAGE_BYTES", default_value_t = 10 * 1024 * 1024)]
    max_image_bytes: u64,

    /// Per-file PDF upload limit in bytes.
    #[arg(long, env = "FILEOPS_MAX_PDF_BYTES", default_value_t = 50_240 * 1024)]
    max_pdf_bytes: u64,

    /// Rasterisation DPI when a request omits it (72–600).
    #[arg(long, env = "FILEOPS_DEFAULT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    default_dpi: u32,

    /// Ghostscript executable.
    #[arg(long, env = "FILEOPS_GHOSTSCRIPT", default_value = "gs")]
    ghostscript: String,

    /// jpegoptim executable.
    #[arg(long, env = "FILEOPS_JPEGOPTIM", default_value = "jpegoptim")]
    jpegoptim: String,

    /// pngquant executable.
    #[arg(long, env = "FILEOPS_PNGQUANT", default_value = "pngquant")]
    pngquant: String,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "FILEOPS_PDFIUM_LIB_DIR")]
    pdfium_lib_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FILEOPS_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "FILEOPS_QUIET")]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> Result<ServiceConfig> {
        let mut builder = ServiceConfig::builder()
            .listen(self.listen)
            .storage_root(&self.storage_root)
            .public_base_url(&self.public_base_url)
            .inline_threshold_bytes(self.inline_threshold_bytes)
            .artifact_ttl(Duration::from_secs(self.artifact_ttl_secs))
            .job_retention(Duration::from_secs(self.job_retention_secs))
            .artifact_sweep_interval(Duration::from_secs(self.artifact_sweep_secs))
            .job_sweep_interval(Duration::from_secs(self.job_sweep_secs))
            .workers(self.workers)
            .max_image_bytes(self.max_image_bytes)
            .max_pdf_bytes(self.max_pdf_bytes)
            .default_dpi(self.default_dpi)
            .ghostscript(&self.ghostscript)
            .jpegoptim(&self.jpegoptim)
            .pngquant(&self.pngquant)
            .pdfium_lib_dir(self.pdfium_lib_dir.clone());
        if let Some(dir) = &self.scratch_dir {
            builder = builder.scratch_dir(dir);
        }
        builder.build().context("Invalid configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.config()?;

    // PDF routes fail per request without pdfium; image routes still work.
    if let Err(e) = PdfiumEngine::new(config.pdfium_lib_dir.clone()).check_available() {
        warn!(error = %e, "pdfium is not available; PDF operations will fail");
    }

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    let toolkit = server::system_toolkit(&config);
    info!(
        storage = %config.storage_root.display(),
        workers = config.workers,
        inline_threshold_bytes = config.inline_threshold_bytes,
        "starting fileops"
    );
    let service = Service::start(config, toolkit).context("Failed to start service")?;
    service
        .serve(listener, server::shutdown_signal())
        .await
        .context("Server terminated with an error")?;
    Ok(())
}
