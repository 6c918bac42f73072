//! Multipart intake.
//!
//! File fields are streamed chunk by chunk into scratch temp files, so an
//! upload is never held in memory whole. Size limits are enforced while
//! streaming and the partial file is removed as soon as a limit trips.
//! Everything returned here is an [`UploadedFile`] whose temp file is
//! deleted on drop, which covers every later rejection path too.
//!
//! | Field                | Kind  | Limit             | Check            |
//! |----------------------|-------|-------------------|------------------|
//! | `image`              | image | `max_image_bytes` | extension        |
//! | `images`, `images[]` | image | `max_image_bytes` | extension        |
//! | `pdf`                | pdf   | `max_pdf_bytes`   | `%PDF` signature |
//! | `pdfs`, `pdfs[]`     | pdf   | `max_pdf_bytes`   | `%PDF` signature |
//!
//! Other fields are read as text options.

use crate::error::FileOpsError;
use crate::pipeline::{scratch_file_in, UploadedFile};
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const PDF_SIGNATURE: &[u8] = b"%PDF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Image,
    Pdf,
}

impl FileKind {
    /// Canonical field name and kind for a multipart field, if it is a file
    /// field.
    fn of_field(name: &str) -> Option<(&'static str, FileKind)> {
        match name {
            "image" => Some(("image", FileKind::Image)),
            "images" | "images[]" => Some(("images", FileKind::Image)),
            "pdf" => Some(("pdf", FileKind::Pdf)),
            "pdfs" | "pdfs[]" => Some(("pdfs", FileKind::Pdf)),
            _ => None,
        }
    }
}

/// Upload limits and the directory uploads are streamed into.
#[derive(Debug, Clone)]
pub struct Intake {
    pub scratch_dir: PathBuf,
    pub max_image_bytes: u64,
    pub max_pdf_bytes: u64,
}

/// A fully received multipart form.
#[derive(Debug, Default)]
pub struct Form {
    files: HashMap<&'static str, Vec<UploadedFile>>,
    text: HashMap<String, String>,
}

impl Intake {
    pub async fn read(&self, mut multipart: Multipart) -> Result<Form, FileOpsError> {
        let mut form = Form::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match FileKind::of_field(&name) {
                Some((canonical, kind)) => {
                    let upload = self.persist(field, &name, kind).await?;
                    debug!(field = canonical, name = %upload.original_name, size = upload.size, "upload received");
                    form.files.entry(canonical).or_default().push(upload);
                }
                None => {
                    let value = field.text().await.map_err(malformed)?;
                    form.text.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    async fn persist(
        &self,
        mut field: Field<'_>,
        field_name: &str,
        kind: FileKind,
    ) -> Result<UploadedFile, FileOpsError> {
        let original_name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| match kind {
                FileKind::Image => "image".to_string(),
                FileKind::Pdf => "document.pdf".to_string(),
            });

        let (limit, ext) = match kind {
            FileKind::Image => {
                let format = crate::engine::RasterFormat::from_path(Path::new(&original_name))
                    .ok_or_else(|| FileOpsError::UnsupportedUpload {
                        name: original_name.clone(),
                        expected: "image (png, jpg, jpeg, webp, gif)",
                    })?;
                (self.max_image_bytes, format.extension())
            }
            FileKind::Pdf => (self.max_pdf_bytes, "pdf"),
        };

        let path = scratch_file_in(&self.scratch_dir, ext)?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| FileOpsError::io(path.to_path_buf(), e))?;

        let mut size: u64 = 0;
        let mut head: Vec<u8> = Vec::with_capacity(PDF_SIGNATURE.len());
        while let Some(chunk) = field.chunk().await.map_err(malformed)? {
            size += chunk.len() as u64;
            if size > limit {
                return Err(FileOpsError::UploadTooLarge {
                    name: original_name,
                    size,
                    limit,
                });
            }
            if head.len() < PDF_SIGNATURE.len() {
                let take = (PDF_SIGNATURE.len() - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| FileOpsError::io(path.to_path_buf(), e))?;
        }
        file.flush()
            .await
            .map_err(|e| FileOpsError::io(path.to_path_buf(), e))?;

        if size == 0 {
            return Err(FileOpsError::validation(field_name, "uploaded file is empty"));
        }
        if kind == FileKind::Pdf && head != PDF_SIGNATURE {
            return Err(FileOpsError::UnsupportedUpload {
                name: original_name,
                expected: "PDF document",
            });
        }

        Ok(UploadedFile::new(original_name, path, size))
    }
}

fn malformed(e: MultipartError) -> FileOpsError {
    FileOpsError::validation("body", e.body_text())
}

impl Form {
    /// The first file under `field`. Extra files under the same name are
    /// dropped (and deleted).
    pub fn file(&mut self, field: &'static str) -> Result<UploadedFile, FileOpsError> {
        self.files
            .remove(field)
            .and_then(|files| files.into_iter().next())
            .ok_or_else(|| FileOpsError::validation(field, "The file is required."))
    }

    /// Every file under `field`, in upload order. At least one is required.
    pub fn files(&mut self, field: &'static str) -> Result<Vec<UploadedFile>, FileOpsError> {
        match self.files.remove(field) {
            Some(files) if !files.is_empty() => Ok(files),
            _ => Err(FileOpsError::validation(field, "At least one file is required.")),
        }
    }

    /// A text option, `None` when absent or blank.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.text
            .get(field)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn integer(&self, field: &str) -> Result<Option<i64>, FileOpsError> {
        self.text(field)
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|_| FileOpsError::validation(field, "must be an integer"))
            })
            .transpose()
    }

    /// Accepts `1/0`, `true/false`, `on/off` and `yes/no`.
    pub fn boolean(&self, field: &str) -> Result<Option<bool>, FileOpsError> {
        self.text(field)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => Ok(true),
                "0" | "false" | "off" | "no" => Ok(false),
                _ => Err(FileOpsError::validation(field, "must be a boolean")),
            })
            .transpose()
    }
}

#[cfg(test)]
impl Form {
    pub(crate) fn with_text(mut self, field: &str, value: &str) -> Self {
        self.text.insert(field.to_string(), value.to_string());
        self
    }
}
