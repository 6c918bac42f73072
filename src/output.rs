//! Response payloads returned inline or stored on a completed job.
//!
//! The same [`ResultPayload`] is used on both paths: the inline path
//! serialises it straight into the HTTP response, the background path
//! stores it as the job's `result`.
//!
//! ```text
//! single : {success, filename, download_url, url, expires_at, <extras>}
//! batch  : {success, <key>: [Download, ...], zip?: Download}
//! ```

use crate::model::{Job, JobStatus, Stage};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Timestamp format of `expires_at` fields (UTC).
pub const EXPIRES_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.format(EXPIRES_AT_FORMAT).to_string()
}

/// Client-facing descriptor of one registered artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Download {
    pub filename: String,
    pub download_url: String,
    pub url: String,
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Success payload of one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    Single {
        download: Download,
        extras: serde_json::Map<String, serde_json::Value>,
    },
    Batch {
        /// `files` or `split_pdfs`.
        key: &'static str,
        files: Vec<Download>,
        zip: Option<Download>,
    },
}

impl ResultPayload {
    pub fn to_value(&self) -> serde_json::Value {
        // Serialising plain strings, numbers and maps cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Every download described by this payload, bundle last.
    pub fn downloads(&self) -> Vec<&Download> {
        match self {
            ResultPayload::Single { download, .. } => vec![download],
            ResultPayload::Batch { files, zip, .. } => files.iter().chain(zip.as_ref()).collect(),
        }
    }
}

impl Serialize for ResultPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("success", &true)?;
        match self {
            ResultPayload::Single { download, extras } => {
                map.serialize_entry("filename", &download.filename)?;
                map.serialize_entry("download_url", &download.download_url)?;
                map.serialize_entry("url", &download.url)?;
                map.serialize_entry("expires_at", &download.expires_at)?;
                for (k, v) in extras {
                    map.serialize_entry(k, v)?;
                }
            }
            ResultPayload::Batch { key, files, zip } => {
                map.serialize_entry(key, files)?;
                if let Some(zip) = zip {
                    map.serialize_entry("zip", zip)?;
                }
            }
        }
        map.end()
    }
}

/// Outcome of submitting an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Ran within the request.
    Inline(ResultPayload),
    /// Deferred to a background worker.
    Queued { job_id: Uuid },
}

/// Body of the job-status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub status: JobStatus,
    pub progress_stage: Stage,
    pub result: Option<serde_json::Value>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            progress_stage: job.progress_stage,
            result: job.result.clone(),
        }
    }
}
