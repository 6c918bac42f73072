//! Best-effort image optimisation with `jpegoptim` and `pngquant`.
//!
//! Both tools rewrite the file in place. A missing binary, a non-zero exit
//! or pngquant's "skip if larger" outcome all leave the file untouched and
//! are reported as `false`, never as an error.

use super::{ImageOptimizer, ProcessRunner, RasterFormat};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CliOptimizer {
    runner: Arc<dyn ProcessRunner>,
    jpegoptim: String,
    pngquant: String,
}

impl CliOptimizer {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        jpegoptim: impl Into<String>,
        pngquant: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            jpegoptim: jpegoptim.into(),
            pngquant: pngquant.into(),
        }
    }

    /// Program and arguments for `format`, or `None` if no tool applies.
    pub fn command(
        &self,
        file: &Path,
        format: RasterFormat,
        quality: u8,
    ) -> Option<(&str, Vec<String>)> {
        let path = file.display().to_string();
        match format {
            RasterFormat::Jpeg => Some((
                self.jpegoptim.as_str(),
                vec![
                    "--strip-all".to_string(),
                    "--preserve".to_string(),
                    format!("--max={quality}"),
                    path,
                ],
            )),
            RasterFormat::Png => {
                let max = quality.min(100);
                let min = quality.saturating_sub(20);
                Some((
                    self.pngquant.as_str(),
                    vec![
                        "--force".to_string(),
                        "--skip-if-larger".to_string(),
                        format!("--quality={min}-{max}"),
                        "--output".to_string(),
                        path.clone(),
                        path,
                    ],
                ))
            }
            RasterFormat::Webp | RasterFormat::Gif => None,
        }
    }
}

#[async_trait]
impl ImageOptimizer for CliOptimizer {
    async fn optimize(&self, file: &Path, format: RasterFormat, quality: u8) -> bool {
        let Some((program, args)) = self.command(file, format, quality) else {
            return false;
        };
        match self.runner.run(program, &args).await {
            Ok(out) if out.success() => {
                debug!(program, file = %file.display(), "optimizer finished");
                true
            }
            Ok(out) => {
                debug!(program, code = ?out.code, diagnostic = %out.diagnostic(), "optimizer skipped");
                false
            }
            Err(e) => {
                warn!(program, error = %e, "optimizer unavailable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::process::TokioProcessRunner;

    fn optimizer() -> CliOptimizer {
        CliOptimizer::new(Arc::new(TokioProcessRunner), "jpegoptim", "pngquant")
    }

    #[test]
    fn pngquant_quality_window() {
        let opt = optimizer();
        let (program, args) = opt.command(Path::new("/t/a.png"), RasterFormat::Png, 80).unwrap();
        assert_eq!(program, "pngquant");
        assert!(args.contains(&"--quality=60-80".to_string()));

        let (_, args) = opt.command(Path::new("/t/a.png"), RasterFormat::Png, 10).unwrap();
        assert!(args.contains(&"--quality=0-10".to_string()));
    }

    #[test]
    fn jpegoptim_uses_max_quality() {
        let opt = optimizer();
        let (program, args) = opt.command(Path::new("/t/a.jpg"), RasterFormat::Jpeg, 70).unwrap();
        assert_eq!(program, "jpegoptim");
        assert_eq!(args, vec!["--strip-all", "--preserve", "--max=70", "/t/a.jpg"]);
    }

    #[test]
    fn webp_has_no_optimizer() {
        assert!(optimizer()
            .command(Path::new("a.webp"), RasterFormat::Webp, 80)
            .is_none());
    }

    #[tokio::test]
    async fn missing_binary_is_not_fatal() {
        let opt = CliOptimizer::new(
            Arc::new(TokioProcessRunner),
            "no-such-jpegoptim-7c1e",
            "no-such-pngquant-7c1e",
        );
        assert!(!opt.optimize(Path::new("/tmp/x.png"), RasterFormat::Png, 80).await);
    }
}
