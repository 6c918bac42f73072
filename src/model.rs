//! Persisted records: [`Artifact`] and [`Job`].
//!
//! The two are independent aggregates. A completed job's result payload
//! names artifacts by `(category, filename)` but holds no reference to the
//! records themselves; once an artifact expires the job result simply
//! points at nothing.
//!
//! ## Job state machine
//!
//! ```text
//! pending ──▶ processing ──┬──▶ completed
//!                          └──▶ failed
//! ```
//!
//! [`Stage`] is the client-visible progress label. It only moves forward
//! (by [`Stage::rank`]) and both terminal statuses freeze the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ── Artifact ─────────────────────────────────────────────────────────────

/// A registered, time-limited downloadable output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub filename: String,
    pub category: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub download_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Artifact {
    /// Logical expiry: true once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Category tags used as the first path segment of downloads and blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Compressed,
    Tuned,
    Pdf,
    Split,
    Merged,
    ImgPng,
    ImgJpeg,
    PdfImages,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Compressed => "compressed",
            Category::Tuned => "tuned",
            Category::Pdf => "pdf",
            Category::Split => "split",
            Category::Merged => "merged",
            Category::ImgPng => "img-png",
            Category::ImgJpeg => "img-jpeg",
            Category::PdfImages => "pdf-images",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Job ──────────────────────────────────────────────────────────────────

/// Operation tag stored on a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ImageCompress,
    ImageTune,
    ImageToPdf,
    ImageToPng,
    ImageToJpeg,
    PdfSplit,
    PdfMerge,
    PdfToImages,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ImageCompress => "image_compress",
            JobKind::ImageTune => "image_tune",
            JobKind::ImageToPdf => "image_to_pdf",
            JobKind::ImageToPng => "image_to_png",
            JobKind::ImageToJpeg => "image_to_jpeg",
            JobKind::PdfSplit => "pdf_split",
            JobKind::PdfMerge => "pdf_merge",
            JobKind::PdfToImages => "pdf_to_images",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Client-visible progress stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Queued,
    Uploaded,
    Normalizing,
    Splitting,
    Merging,
    Converting,
    Zipping,
    Completed,
    Error,
}

impl Stage {
    /// Position in the forward-only sequence. Operation-specific work
    /// stages share a rank; no operation uses more than one of them.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::Uploaded => 1,
            Stage::Normalizing => 2,
            Stage::Splitting | Stage::Merging | Stage::Converting => 3,
            Stage::Zipping => 4,
            Stage::Completed | Stage::Error => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Uploaded => "uploaded",
            Stage::Normalizing => "normalizing",
            Stage::Splitting => "splitting",
            Stage::Merging => "merging",
            Stage::Converting => "converting",
            Stage::Zipping => "zipping",
            Stage::Completed => "completed",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected job transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already {0:?}; further updates are ignored")]
    Frozen(JobStatus),

    #[error("stage cannot move backwards from {from} to {to}")]
    Regression { from: Stage, to: Stage },

    #[error("job cannot go from {from:?} to {to:?}")]
    Illegal { from: JobStatus, to: JobStatus },
}

/// A tracked background unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress_stage: Stage,
    /// Success payload (completed) or `{"message": ...}` (failed).
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(kind: JobKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            progress_stage: Stage::Queued,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `pending → processing`, stage `uploaded`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(self.frozen_or(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.progress_stage = Stage::Uploaded;
        self.updated_at = now;
        Ok(())
    }

    /// Move the progress stage forward. Re-announcing the current stage is
    /// accepted as a no-op.
    pub fn advance(&mut self, stage: Stage, now: DateTime<Utc>) -> Result<bool, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Frozen(self.status));
        }
        if stage == self.progress_stage {
            return Ok(false);
        }
        if stage.rank() <= self.progress_stage.rank() || stage.rank() >= Stage::Completed.rank() {
            return Err(TransitionError::Regression {
                from: self.progress_stage,
                to: stage,
            });
        }
        self.progress_stage = stage;
        self.updated_at = now;
        Ok(true)
    }

    pub fn complete(
        &mut self,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.frozen_or(JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.progress_stage = Stage::Completed;
        self.result = Some(payload);
        self.updated_at = now;
        Ok(())
    }

    /// Allowed from both `pending` and `processing`, so a job that never
    /// reached a worker can still be closed out.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Frozen(self.status));
        }
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Processing failed".to_string();
        }
        self.status = JobStatus::Failed;
        self.progress_stage = Stage::Error;
        self.result = Some(serde_json::json!({ "message": message }));
        self.updated_at = now;
        Ok(())
    }

    /// Error text of a failed job.
    pub fn failure_message(&self) -> Option<&str> {
        if self.status != JobStatus::Failed {
            return None;
        }
        self.result
            .as_ref()
            .and_then(|r| r.get("message"))
            .and_then(|m| m.as_str())
    }

    fn frozen_or(&self, to: JobStatus) -> TransitionError {
        if self.status.is_terminal() {
            TransitionError::Frozen(self.status)
        } else {
            TransitionError::Illegal {
                from: self.status,
                to,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn started() -> Job {
        let now = Utc::now();
        let mut job = Job::new(JobKind::PdfSplit, now);
        job.start(now).unwrap();
        job
    }

    #[test]
    fn new_job_is_pending_and_queued() {
        let job = Job::new(JobKind::PdfMerge, Utc::now());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress_stage, Stage::Queued);
        assert!(job.result.is_none());
    }

    #[test]
    fn stages_only_move_forward() {
        let mut job = started();
        let now = Utc::now();
        assert_eq!(job.advance(Stage::Normalizing, now), Ok(true));
        assert_eq!(job.advance(Stage::Splitting, now), Ok(true));
        assert_eq!(job.advance(Stage::Splitting, now), Ok(false));
        assert!(matches!(
            job.advance(Stage::Normalizing, now),
            Err(TransitionError::Regression { .. })
        ));
        assert_eq!(job.progress_stage, Stage::Splitting);
        assert_eq!(job.advance(Stage::Zipping, now), Ok(true));
    }

    #[test]
    fn terminal_stages_are_not_reachable_via_advance() {
        let mut job = started();
        assert!(job.advance(Stage::Completed, Utc::now()).is_err());
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn completion_freezes_the_job() {
        let mut job = started();
        let now = Utc::now();
        job.complete(json!({"success": true}), now).unwrap();
        assert_eq!(job.progress_stage, Stage::Completed);
        assert_eq!(
            job.advance(Stage::Zipping, now),
            Err(TransitionError::Frozen(JobStatus::Completed))
        );
        assert!(job.fail("late", now).is_err());
        assert_eq!(job.result, Some(json!({"success": true})));
    }

    #[test]
    fn failure_records_message() {
        let mut job = started();
        job.fail("Normalization failed: boom", Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress_stage, Stage::Error);
        assert_eq!(job.failure_message(), Some("Normalization failed: boom"));
    }

    #[test]
    fn blank_failure_message_is_replaced() {
        let mut job = started();
        job.fail("  ", Utc::now()).unwrap();
        assert_eq!(job.failure_message(), Some("Processing failed"));
    }

    #[test]
    fn complete_requires_processing() {
        let mut job = Job::new(JobKind::ImageTune, Utc::now());
        assert!(matches!(
            job.complete(json!({}), Utc::now()),
            Err(TransitionError::Illegal { .. })
        ));
    }

    #[test]
    fn kind_serialises_as_tag() {
        assert_eq!(
            serde_json::to_value(JobKind::PdfToImages).unwrap(),
            json!("pdf_to_images")
        );
        assert_eq!(JobKind::PdfSplit.as_str(), "pdf_split");
        assert_eq!(serde_json::to_value(Stage::Normalizing).unwrap(), json!("normalizing"));
    }

    #[test]
    fn artifact_expiry_is_strict() {
        let now = Utc::now();
        let artifact = Artifact {
            id: Uuid::new_v4(),
            filename: "a.pdf".into(),
            category: "split".into(),
            storage_path: "split/a.pdf".into(),
            size_bytes: 1,
            download_count: 0,
            created_at: now,
            expires_at: now,
        };
        assert!(!artifact.is_expired(now));
        assert!(artifact.is_expired(now + chrono::Duration::seconds(1)));
    }
}
