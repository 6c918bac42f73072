//! Record persistence for artifacts and jobs.
//!
//! [`Repository`] is the seam for a relational store. [`MemoryRepository`]
//! keeps everything in process memory behind a `tokio::sync::RwLock`; each
//! call takes the lock once, so per-record updates are serialised.

use crate::model::{Artifact, Job};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("artifact `{category}/{filename}` already exists")]
    DuplicateArtifact { category: String, filename: String },

    #[error("record `{0}` not found")]
    NotFound(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Repository: Send + Sync {
    // ── Artifacts ────────────────────────────────────────────────────────
    async fn insert_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError>;

    /// Exact match on both fields.
    async fn find_artifact(
        &self,
        category: &str,
        filename: &str,
    ) -> Result<Option<Artifact>, RepositoryError>;

    async fn increment_downloads(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Artifacts whose `expires_at` is strictly before `cutoff`.
    async fn list_expired_artifacts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Artifact>, RepositoryError>;

    /// Returns whether a record was removed.
    async fn delete_artifact(&self, id: Uuid) -> Result<bool, RepositoryError>;

    // ── Jobs ─────────────────────────────────────────────────────────────
    async fn insert_job(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, RepositoryError>;

    /// Replace the stored record. Fails with `NotFound` if it was deleted.
    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError>;

    /// Delete jobs created strictly before `cutoff`, regardless of status.
    async fn delete_jobs_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}

#[derive(Debug, Default)]
struct Tables {
    artifacts: HashMap<Uuid, Artifact>,
    by_name: HashMap<(String, String), Uuid>,
    jobs: HashMap<Uuid, Job>,
}

/// In-process repository.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn artifact_count(&self) -> usize {
        self.tables.read().await.artifacts.len()
    }

    pub async fn job_count(&self) -> usize {
        self.tables.read().await.jobs.len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let key = (artifact.category.clone(), artifact.filename.clone());
        if t.by_name.contains_key(&key) {
            return Err(RepositoryError::DuplicateArtifact {
                category: key.0,
                filename: key.1,
            });
        }
        t.by_name.insert(key, artifact.id);
        t.artifacts.insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn find_artifact(
        &self,
        category: &str,
        filename: &str,
    ) -> Result<Option<Artifact>, RepositoryError> {
        let t = self.tables.read().await;
        let found = t
            .by_name
            .get(&(category.to_string(), filename.to_string()))
            .and_then(|id| t.artifacts.get(id))
            .cloned();
        Ok(found)
    }

    async fn increment_downloads(&self, id: Uuid) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        let artifact = t.artifacts.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        artifact.download_count = artifact.download_count.saturating_add(1);
        Ok(())
    }

    async fn list_expired_artifacts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        let t = self.tables.read().await;
        let mut expired: Vec<Artifact> = t
            .artifacts
            .values()
            .filter(|a| a.expires_at < cutoff)
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.expires_at);
        Ok(expired)
    }

    async fn delete_artifact(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut t = self.tables.write().await;
        match t.artifacts.remove(&id) {
            Some(a) => {
                t.by_name.remove(&(a.category, a.filename));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_job(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        t.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut t = self.tables.write().await;
        match t.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(job.id)),
        }
    }

    async fn delete_jobs_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut t = self.tables.write().await;
        let before = t.jobs.len();
        t.jobs.retain(|_, job| job.created_at >= cutoff);
        Ok(before - t.jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobKind;
    use chrono::Duration;

    fn artifact(category: &str, filename: &str, expires_at: DateTime<Utc>) -> Artifact {
        Artifact {
            id: Uuid::new_v4(),
            filename: filename.into(),
            category: category.into(),
            storage_path: format!("{category}/{filename}"),
            size_bytes: 3,
            download_count: 0,
            created_at: expires_at - Duration::hours(2),
            expires_at,
        }
    }

    #[tokio::test]
    async fn find_requires_both_fields() {
        let repo = MemoryRepository::new();
        let a = artifact("split", "a.pdf", Utc::now());
        repo.insert_artifact(&a).await.unwrap();
        assert!(repo.find_artifact("split", "a.pdf").await.unwrap().is_some());
        assert!(repo.find_artifact("merged", "a.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_names_rejected() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        repo.insert_artifact(&artifact("pdf", "x.pdf", now)).await.unwrap();
        assert!(matches!(
            repo.insert_artifact(&artifact("pdf", "x.pdf", now)).await,
            Err(RepositoryError::DuplicateArtifact { .. })
        ));
    }

    #[tokio::test]
    async fn expired_listing_uses_strict_cutoff() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        repo.insert_artifact(&artifact("pdf", "old.pdf", now - Duration::seconds(1)))
            .await
            .unwrap();
        repo.insert_artifact(&artifact("pdf", "edge.pdf", now)).await.unwrap();
        let expired = repo.list_expired_artifacts(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].filename, "old.pdf");
    }

    #[tokio::test]
    async fn download_counter_increments() {
        let repo = MemoryRepository::new();
        let a = artifact("tuned", "t.png", Utc::now());
        repo.insert_artifact(&a).await.unwrap();
        repo.increment_downloads(a.id).await.unwrap();
        repo.increment_downloads(a.id).await.unwrap();
        let found = repo.find_artifact("tuned", "t.png").await.unwrap().unwrap();
        assert_eq!(found.download_count, 2);
    }

    #[tokio::test]
    async fn job_retention_sweep() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let old = Job::new(JobKind::PdfMerge, now - Duration::days(2));
        let fresh = Job::new(JobKind::PdfMerge, now);
        repo.insert_job(&old).await.unwrap();
        repo.insert_job(&fresh).await.unwrap();
        let removed = repo
            .delete_jobs_created_before(now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get_job(old.id).await.unwrap().is_none());
        assert!(repo.get_job(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_of_deleted_job_fails() {
        let repo = MemoryRepository::new();
        let job = Job::new(JobKind::PdfSplit, Utc::now());
        assert!(matches!(
            repo.update_job(&job).await,
            Err(RepositoryError::NotFound(_))
        ));
    }
}
