//! Periodic reclamation of expired artifacts and stale job records.
//!
//! Two independent timers drive two sweeps:
//!
//! | Sweep     | Default period | Deletes |
//! |-----------|----------------|---------|
//! | artifacts | 1 h            | records (and blobs) whose `expires_at` has passed |
//! | jobs      | 24 h           | job records created more than `job_retention` ago, any status |
//!
//! Both are best effort. A failed pass is logged and the next tick simply
//! tries again; a missed tick is skipped rather than replayed.

use crate::clock::Clock;
use crate::error::FileOpsError;
use crate::storage::{ArtifactStore, Repository, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

/// What one artifact pass reclaimed.
pub type ArtifactSweep = SweepReport;

pub struct ExpiryReaper {
    artifacts: ArtifactStore,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    job_retention: chrono::Duration,
    artifact_every: Duration,
    job_every: Duration,
}

impl ExpiryReaper {
    pub fn new(
        artifacts: ArtifactStore,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        job_retention: Duration,
    ) -> Result<Self, FileOpsError> {
        let job_retention = chrono::Duration::from_std(job_retention)
            .map_err(|e| FileOpsError::InvalidConfig(format!("job retention: {e}")))?;
        Ok(Self {
            artifacts,
            repository,
            clock,
            job_retention,
            artifact_every: Duration::from_secs(3600),
            job_every: Duration::from_secs(24 * 3600),
        })
    }

    pub fn with_intervals(mut self, artifacts: Duration, jobs: Duration) -> Self {
        self.artifact_every = artifacts;
        self.job_every = jobs;
        self
    }

    /// One artifact pass.
    pub async fn sweep_artifacts(&self) -> Result<ArtifactSweep, FileOpsError> {
        let report = self.artifacts.sweep_expired().await?;
        info!(
            deleted = report.deleted,
            blob_failures = report.blob_failures,
            "expired artifact sweep finished"
        );
        Ok(report)
    }

    /// One job pass. Returns the number of records deleted.
    pub async fn sweep_jobs(&self) -> Result<usize, FileOpsError> {
        let cutoff = self.clock.now() - self.job_retention;
        let deleted = self.repository.delete_jobs_created_before(cutoff).await?;
        info!(deleted, %cutoff, "stale job sweep finished");
        Ok(deleted)
    }

    /// Spawn the timer loop. The first pass of each sweep runs one period
    /// after start.
    pub fn start(self) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let span = info_span!("reaper");

        let task = tokio::spawn(
            async move {
                let now = Instant::now();
                let mut artifact_tick = interval_at(now + self.artifact_every, self.artifact_every);
                let mut job_tick = interval_at(now + self.job_every, self.job_every);
                artifact_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                job_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                debug!(
                    artifact_every = ?self.artifact_every,
                    job_every = ?self.job_every,
                    "reaper started"
                );

                loop {
                    tokio::select! {
                        _ = artifact_tick.tick() => {
                            if let Err(e) = self.sweep_artifacts().await {
                                warn!(error = %e, "expired artifact sweep failed");
                            }
                        }
                        _ = job_tick.tick() => {
                            if let Err(e) = self.sweep_jobs().await {
                                warn!(error = %e, "stale job sweep failed");
                            }
                        }
                        _ = stop_rx.changed() => break,
                    }
                }
                debug!("reaper stopped");
            }
            .instrument(span),
        );

        ReaperHandle { stop_tx, task }
    }
}

pub struct ReaperHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop after the pass in progress, if any.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(error) = self.task.await {
            warn!(%error, "Reaper task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{Job, JobKind};
    use crate::storage::{BlobStore, FsBlobStore, MemoryRepository};
    use chrono::Utc;

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        repo: Arc<MemoryRepository>,
        store: ArtifactStore,
        reaper: ExpiryReaper,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let repo = Arc::new(MemoryRepository::new());
        let store = ArtifactStore::new(
            repo.clone(),
            Arc::new(FsBlobStore::new(dir.path(), "http://test")),
            clock.clone(),
            chrono::Duration::hours(2),
        );
        let reaper = ExpiryReaper::new(
            store.clone(),
            repo.clone(),
            clock.clone(),
            Duration::from_secs(24 * 3600),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            clock,
            repo,
            store,
            reaper,
        }
    }

    #[tokio::test]
    async fn artifact_sweep_reclaims_only_expired() {
        let f = fixture();
        f.store.blobs().put("split/old.pdf", b"old").await.unwrap();
        f.store.register("old.pdf", "split", "split/old.pdf", 3).await.unwrap();
        f.clock.advance(chrono::Duration::hours(3));
        f.store.blobs().put("split/new.pdf", b"new").await.unwrap();
        f.store.register("new.pdf", "split", "split/new.pdf", 3).await.unwrap();

        let report = f.reaper.sweep_artifacts().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(f.repo.artifact_count().await, 1);
        assert!(!f.store.blobs().exists("split/old.pdf").await.unwrap());
        assert!(f.store.blobs().exists("split/new.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn job_sweep_ignores_status() {
        let f = fixture();
        let mut done = Job::new(JobKind::PdfMerge, f.clock.now());
        done.start(f.clock.now()).unwrap();
        done.fail("boom", f.clock.now()).unwrap();
        f.repo.insert_job(&done).await.unwrap();
        f.repo
            .insert_job(&Job::new(JobKind::PdfSplit, f.clock.now()))
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::hours(23));
        assert_eq!(f.reaper.sweep_jobs().await.unwrap(), 0);

        f.clock.advance(chrono::Duration::hours(2));
        assert_eq!(f.reaper.sweep_jobs().await.unwrap(), 2);
        assert_eq!(f.repo.job_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_loop_runs_sweeps_and_stops() {
        let f = fixture();
        f.store.blobs().put("tuned/a.png", b"a").await.unwrap();
        f.store.register("a.png", "tuned", "tuned/a.png", 1).await.unwrap();
        f.clock.advance(chrono::Duration::hours(3));

        let handle = f
            .reaper
            .with_intervals(Duration::from_secs(60), Duration::from_secs(600))
            .start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        handle.shutdown().await;

        assert_eq!(f.repo.artifact_count().await, 0);
    }
}
