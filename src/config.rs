//! Service configuration.
//!
//! Every knob lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The binary maps command-line flags and
//! `FILEOPS_*` environment variables onto the builder; tests set only the
//! fields they care about and rely on the defaults for the rest.
//!
//! # Design choice: builder over constructor
//! Most deployments change two or three values (listen address, storage
//! root, public URL). The builder lets callers set only those, and
//! [`ServiceConfigBuilder::build`] checks the cross-field constraints once.

use crate::error::FileOpsError;
use crate::pipeline::{Quality, RasterOptions};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const KIB: u64 = 1024;

/// Configuration for the file-conversion service.
///
/// # Example
/// ```rust
/// use edgequake_fileops::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .storage_root("/var/lib/fileops")
///     .workers(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.scratch_dir, std::path::PathBuf::from("/var/lib/fileops/temp"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP server binds. Default: `127.0.0.1:8080`.
    pub listen: SocketAddr,

    /// Root of the blob store. Default: `./storage`.
    pub storage_root: PathBuf,

    /// Uploads and intermediate files. Default: `<storage_root>/temp`.
    pub scratch_dir: PathBuf,

    /// Base of every `url` and `download_url` handed to clients.
    /// Default: `http://127.0.0.1:8080`.
    pub public_base_url: String,

    /// Requests whose total input size is at or below this run inline.
    /// Default: 5 MiB.
    ///
    /// Above it, work is queued and the client polls the job endpoint. The
    /// value trades request latency against polling round-trips: a PDF split
    /// of a few MiB finishes well inside a typical proxy timeout, while a
    /// 40 MiB Ghostscript pass does not.
    pub inline_threshold_bytes: u64,

    /// Lifetime of every artifact from creation. Default: 2 h.
    pub artifact_ttl: Duration,

    /// Job records older than this are deleted. Default: 24 h.
    pub job_retention: Duration,

    /// Period of the expired-artifact sweep. Default: 1 h.
    pub artifact_sweep_interval: Duration,

    /// Period of the stale-job sweep. Default: 24 h.
    pub job_sweep_interval: Duration,

    /// Background workers pulling from the job queue. Default: 2.
    pub workers: usize,

    /// Per-file limit for image uploads. Default: 10 MiB.
    pub max_image_bytes: u64,

    /// Per-file limit for PDF uploads. Default: 50 240 KiB.
    pub max_pdf_bytes: u64,

    /// Compress quality when the request omits it. Default: 80.
    pub default_compress_quality: u8,

    /// JPEG conversion quality when the request omits it. Default: 85.
    pub default_jpeg_quality: u8,

    /// Rasterisation DPI when the request omits it. Default: 150.
    pub default_dpi: u32,

    /// Ghostscript executable. Default: `gs`.
    pub ghostscript: String,

    /// jpegoptim executable. Default: `jpegoptim`.
    pub jpegoptim: String,

    /// pngquant executable. Default: `pngquant`.
    pub pngquant: String,

    /// Directory holding the pdfium shared library. `None` binds the
    /// system library.
    pub pdfium_lib_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let storage_root = PathBuf::from("./storage");
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            scratch_dir: storage_root.join("temp"),
            storage_root,
            public_base_url: "http://127.0.0.1:8080".to_string(),
            inline_threshold_bytes: 5 * MIB,
            artifact_ttl: Duration::from_secs(2 * 3600),
            job_retention: Duration::from_secs(24 * 3600),
            artifact_sweep_interval: Duration::from_secs(3600),
            job_sweep_interval: Duration::from_secs(24 * 3600),
            workers: 2,
            max_image_bytes: 10 * MIB,
            max_pdf_bytes: 50_240 * KIB,
            default_compress_quality: 80,
            default_jpeg_quality: 85,
            default_dpi: RasterOptions::DEFAULT_DPI,
            ghostscript: "gs".to_string(),
            jpegoptim: "jpegoptim".to_string(),
            pngquant: "pngquant".to_string(),
            pdfium_lib_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
            scratch_dir_set: false,
        }
    }

    /// Largest request body the server accepts: enough for a batch of
    /// maximum-size PDFs plus multipart overhead.
    pub fn max_request_bytes(&self) -> usize {
        let per_file = self.max_pdf_bytes.max(self.max_image_bytes);
        (per_file.saturating_mul(8)).min(usize::MAX as u64) as usize
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
    scratch_dir_set: bool,
}

impl ServiceConfigBuilder {
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.config.listen = addr;
        self
    }

    /// Also moves the scratch dir to `<root>/temp` unless it was set
    /// explicitly.
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        if !self.scratch_dir_set {
            self.config.scratch_dir = self.config.storage_root.join("temp");
        }
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self.scratch_dir_set = true;
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn inline_threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.inline_threshold_bytes = bytes;
        self
    }

    pub fn artifact_ttl(mut self, ttl: Duration) -> Self {
        self.config.artifact_ttl = ttl;
        self
    }

    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.config.job_retention = retention;
        self
    }

    pub fn artifact_sweep_interval(mut self, every: Duration) -> Self {
        self.config.artifact_sweep_interval = every;
        self
    }

    pub fn job_sweep_interval(mut self, every: Duration) -> Self {
        self.config.job_sweep_interval = every;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    pub fn max_image_bytes(mut self, bytes: u64) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn max_pdf_bytes(mut self, bytes: u64) -> Self {
        self.config.max_pdf_bytes = bytes;
        self
    }

    pub fn default_compress_quality(mut self, q: u8) -> Self {
        self.config.default_compress_quality = q;
        self
    }

    pub fn default_jpeg_quality(mut self, q: u8) -> Self {
        self.config.default_jpeg_quality = q;
        self
    }

    pub fn default_dpi(mut self, dpi: u32) -> Self {
        self.config.default_dpi = dpi;
        self
    }

    pub fn ghostscript(mut self, program: impl Into<String>) -> Self {
        self.config.ghostscript = program.into();
        self
    }

    pub fn jpegoptim(mut self, program: impl Into<String>) -> Self {
        self.config.jpegoptim = program.into();
        self
    }

    pub fn pngquant(mut self, program: impl Into<String>) -> Self {
        self.config.pngquant = program.into();
        self
    }

    pub fn pdfium_lib_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.pdfium_lib_dir = dir;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, FileOpsError> {
        let c = &self.config;
        let invalid = |msg: String| Err(FileOpsError::InvalidConfig(msg));

        if c.workers == 0 {
            return invalid("Workers must be ≥ 1".into());
        }
        if c.storage_root.as_os_str().is_empty() || c.scratch_dir.as_os_str().is_empty() {
            return invalid("Storage and scratch directories must be set".into());
        }
        if !c.public_base_url.starts_with("http://") && !c.public_base_url.starts_with("https://") {
            return invalid(format!(
                "Public base URL must start with http:// or https://, got {}",
                c.public_base_url
            ));
        }
        for (name, q) in [
            ("compress quality", c.default_compress_quality),
            ("JPEG quality", c.default_jpeg_quality),
        ] {
            if Quality::new(q as i64).is_err() {
                return invalid(format!("Default {name} must be 10–100, got {q}"));
            }
        }
        if RasterOptions::new(c.default_dpi as i64, false).is_err() {
            return invalid(format!("Default DPI must be 72–600, got {}", c.default_dpi));
        }
        if c.artifact_ttl.is_zero() || c.job_retention.is_zero() {
            return invalid("Artifact TTL and job retention must be non-zero".into());
        }
        if c.artifact_sweep_interval.is_zero() || c.job_sweep_interval.is_zero() {
            return invalid("Sweep intervals must be non-zero".into());
        }
        if c.max_image_bytes == 0 || c.max_pdf_bytes == 0 {
            return invalid("Upload limits must be non-zero".into());
        }
        Ok(self.config)
    }
}
