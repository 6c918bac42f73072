//! Artifact registration, resolution and expiry.
//!
//! Every generated output is registered here with a fixed TTL from
//! creation. Resolution applies *logical* expiry, so an artifact past its
//! `expires_at` is gone for clients even if the hourly sweep has not yet
//! removed it physically.

use crate::clock::Clock;
use crate::error::FileOpsError;
use crate::model::Artifact;
use crate::storage::blob::BlobStore;
use crate::storage::repository::Repository;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one [`ArtifactStore::sweep_expired`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records deleted (their blobs are gone too).
    pub deleted: usize,
    /// Records kept because the blob could not be deleted.
    pub blob_failures: usize,
}

#[derive(Clone)]
pub struct ArtifactStore {
    repository: Arc<dyn Repository>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ArtifactStore {
    pub fn new(
        repository: Arc<dyn Repository>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            repository,
            blobs,
            clock,
            ttl,
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create and persist an artifact expiring `ttl` after now.
    pub async fn register(
        &self,
        filename: &str,
        category: &str,
        storage_path: &str,
        size_bytes: u64,
    ) -> Result<Artifact, FileOpsError> {
        let now = self.clock.now();
        let artifact = Artifact {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            category: category.to_string(),
            storage_path: storage_path.to_string(),
            size_bytes,
            download_count: 0,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.repository.insert_artifact(&artifact).await?;
        debug!(category, filename, size_bytes, "artifact registered");
        Ok(artifact)
    }

    /// Look up a live artifact by `(category, filename)`.
    ///
    /// Fails with [`FileOpsError::ArtifactNotFound`] when there is no
    /// record or it has logically expired, and with
    /// [`FileOpsError::ArtifactMissing`] when the blob is absent.
    pub async fn resolve(&self, category: &str, filename: &str) -> Result<Artifact, FileOpsError> {
        let artifact = self
            .repository
            .find_artifact(category, filename)
            .await?
            .ok_or(FileOpsError::ArtifactNotFound)?;

        if artifact.is_expired(self.clock.now()) {
            return Err(FileOpsError::ArtifactNotFound);
        }
        if !self.blobs.exists(&artifact.storage_path).await? {
            return Err(FileOpsError::ArtifactMissing);
        }
        Ok(artifact)
    }

    /// Look up a live artifact by its blob path, as served under
    /// `/storage`. Paths with no registered artifact behind them, such as
    /// scratch files, are reported as not found.
    pub async fn resolve_path(&self, storage_path: &str) -> Result<Artifact, FileOpsError> {
        let (category, filename) = storage_path
            .split_once('/')
            .ok_or(FileOpsError::ArtifactNotFound)?;
        let artifact = self.resolve(category, filename).await?;
        if artifact.storage_path != storage_path {
            return Err(FileOpsError::ArtifactNotFound);
        }
        Ok(artifact)
    }

    /// Remove an artifact this process just registered: blob first, then
    /// the record. Best effort; failures are logged.
    pub async fn discard(&self, artifact: &Artifact) {
        if let Err(e) = self.blobs.delete(&artifact.storage_path).await {
            warn!(path = %artifact.storage_path, error = %e, "failed to remove discarded blob");
        }
        if let Err(e) = self.repository.delete_artifact(artifact.id).await {
            warn!(artifact_id = %artifact.id, error = %e, "failed to remove discarded record");
        }
    }

    /// Bump the download counter. Failures are logged, never returned.
    pub async fn record_download(&self, artifact: &Artifact) {
        if let Err(e) = self.repository.increment_downloads(artifact.id).await {
            warn!(artifact_id = %artifact.id, error = %e, "failed to record download");
        }
    }

    /// Delete every artifact that expired before this pass started.
    ///
    /// The cutoff is captured once up front; anything registered while the
    /// pass runs expires a full TTL later and is never touched. A record is
    /// only deleted after its blob delete succeeded (or found nothing), so
    /// running twice deletes nothing the second time.
    pub async fn sweep_expired(&self) -> Result<SweepReport, FileOpsError> {
        let cutoff = self.clock.now();
        let expired = self.repository.list_expired_artifacts(cutoff).await?;
        let mut report = SweepReport::default();

        for artifact in expired {
            if let Err(e) = self.blobs.delete(&artifact.storage_path).await {
                warn!(path = %artifact.storage_path, error = %e, "failed to delete expired blob");
                report.blob_failures += 1;
                continue;
            }
            if self.repository.delete_artifact(artifact.id).await? {
                report.deleted += 1;
            }
        }
        Ok(report)
    }
}
