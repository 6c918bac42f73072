//! PDF normalisation through Ghostscript's `pdfwrite` device.
//!
//! Rewriting every input through `gs` repairs broken cross-reference
//! tables, flattens incompatible features and downgrades to PDF 1.4, which
//! keeps the page-level engine away from malformed documents.

use super::{PdfNormalizer, ProcessRunner};
use crate::error::FileOpsError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const STAGE: &str = "Normalization";

pub struct GhostscriptNormalizer {
    runner: Arc<dyn ProcessRunner>,
    program: String,
}

impl GhostscriptNormalizer {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Argument vector for one normalisation run.
    pub fn args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-sDEVICE=pdfwrite".to_string(),
            "-dCompatibilityLevel=1.4".to_string(),
            "-dPDFSETTINGS=/screen".to_string(),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            format!("-sOutputFile={}", output.display()),
            input.display().to_string(),
        ]
    }

    fn failure(&self, diagnostic: impl Into<String>) -> FileOpsError {
        FileOpsError::ExternalTool {
            stage: STAGE,
            tool: self.program.clone(),
            diagnostic: diagnostic.into(),
        }
    }
}

#[async_trait]
impl PdfNormalizer for GhostscriptNormalizer {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<(), FileOpsError> {
        let args = Self::args(input, output);
        let result = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(|e| self.failure(format!("could not run {}: {e}", self.program)))?;

        if !result.success() {
            warn!(input = %input.display(), code = ?result.code, "normalizer exited unsuccessfully");
            return Err(self.failure(result.diagnostic()));
        }
        let produced = tokio::fs::metadata(output)
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(self.failure(format!(
                "{} produced no output file. {}",
                self.program,
                result.diagnostic()
            )));
        }
        debug!(input = %input.display(), output = %output.display(), "pdf normalized");
        Ok(())
    }
}
