//! Inline/background dispatch and background job execution.
//!
//! ## Inline or background?
//!
//! [`JobExecutor::submit`] compares [`Operation::cost_bytes`] with the
//! configured threshold. At or below it the pipeline runs on the calling
//! task and the payload is returned directly. Above it a `pending` job is
//! persisted, the operation is queued, and only the job id is returned; the
//! pipeline never runs on the calling path.
//!
//! ## Background execution
//!
//! ```text
//! pending ─start─▶ processing ─┬─ pipeline + publish (spawned task)
//!                              │      └─ ChannelProgress ─▶ stage events
//!                              ├─ persist each event as it arrives
//!                              └─ sender dropped ─▶ drain done ─▶ completed | failed
//! ```
//!
//! The pipeline runs in its own task so a panic is caught as a `JoinError`
//! and still ends in `failed`. The progress channel closes only when that
//! task has finished (normally or by unwinding), so every stage event is
//! persisted before the terminal state is written.

use crate::clock::Clock;
use crate::error::FileOpsError;
use crate::model::{Job, Stage};
use crate::output::{Dispatch, ResultPayload};
use crate::pipeline::{self, Operation, Toolkit};
use crate::progress::{ChannelProgress, NoopProgress};
use crate::publish::ArtifactPublisher;
use crate::storage::Repository;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message used when a background task panics.
const UNEXPECTED_FAILURE: &str = "Processing failed unexpectedly";

/// An operation waiting for a worker.
#[derive(Debug)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub operation: Operation,
}

struct Inner {
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    toolkit: Toolkit,
    publisher: ArtifactPublisher,
    inline_threshold_bytes: u64,
    queue: mpsc::UnboundedSender<QueuedJob>,
}

/// Decides where an operation runs, and runs background jobs to a
/// terminal state.
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<Inner>,
}

impl JobExecutor {
    /// The receiver half is handed to a [`super::WorkerPool`].
    pub fn new(
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        toolkit: Toolkit,
        publisher: ArtifactPublisher,
        inline_threshold_bytes: u64,
    ) -> (Self, mpsc::UnboundedReceiver<QueuedJob>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            repository,
            clock,
            toolkit,
            publisher,
            inline_threshold_bytes,
            queue,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.inner.repository
    }

    pub fn publisher(&self) -> &ArtifactPublisher {
        &self.inner.publisher
    }

    pub fn inline_threshold_bytes(&self) -> u64 {
        self.inner.inline_threshold_bytes
    }

    /// Run inline or queue, depending on the operation's cost.
    pub async fn submit(&self, operation: Operation) -> Result<Dispatch, FileOpsError> {
        let cost = operation.cost_bytes();
        if cost <= self.inner.inline_threshold_bytes {
            debug!(kind = operation.kind().as_str(), cost, "running inline");
            let payload = self.run_inline(operation).await?;
            return Ok(Dispatch::Inline(payload));
        }

        let now = self.inner.clock.now();
        let job = Job::new(operation.kind(), now);
        self.inner.repository.insert_job(&job).await?;

        let queued = QueuedJob {
            job_id: job.id,
            operation,
        };
        if let Err(mpsc::error::SendError(rejected)) = self.inner.queue.send(queued) {
            // Workers are gone; close the record out rather than leave it pending.
            drop(rejected);
            let mut job = job;
            if job.fail("Service is shutting down", self.inner.clock.now()).is_ok() {
                self.persist(&job).await;
            }
            return Err(FileOpsError::Internal("job queue is closed".into()));
        }

        info!(job_id = %job.id, kind = job.kind.as_str(), cost, "job queued");
        Ok(Dispatch::Queued { job_id: job.id })
    }

    async fn run_inline(&self, operation: Operation) -> Result<ResultPayload, FileOpsError> {
        let output = pipeline::run(operation, &self.inner.toolkit, &NoopProgress).await?;
        self.inner.publisher.publish(output, &NoopProgress).await
    }

    /// Look up a job for the status endpoint.
    pub async fn job(&self, id: Uuid) -> Result<Job, FileOpsError> {
        self.inner
            .repository
            .get_job(id)
            .await?
            .ok_or_else(|| FileOpsError::JobNotFound { id: id.to_string() })
    }

    /// Drive one queued job to `completed` or `failed`.
    ///
    /// Never returns an error: every failure, including a panic inside the
    /// pipeline, is recorded on the job. Input temp files are dropped with
    /// the operation on every path.
    pub async fn execute(&self, queued: QueuedJob) {
        let QueuedJob { job_id, operation } = queued;

        let mut job = match self.inner.repository.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(%job_id, "queued job no longer exists; dropping it");
                return;
            }
            Err(e) => {
                error!(%job_id, error = %e, "failed to load queued job");
                return;
            }
        };
        if let Err(e) = job.start(self.inner.clock.now()) {
            warn!(%job_id, error = %e, "job cannot start");
            return;
        }
        self.persist(&job).await;
        info!(%job_id, kind = job.kind.as_str(), "job started");

        let (sink, mut events) = ChannelProgress::new();
        let toolkit = self.inner.toolkit.clone();
        let publisher = self.inner.publisher.clone();
        let task = tokio::spawn(async move {
            let output = pipeline::run(operation, &toolkit, &sink).await?;
            publisher.publish(output, &sink).await
        });

        while let Some(stage) = events.recv().await {
            self.apply_stage(&mut job, stage).await;
        }

        let now = self.inner.clock.now();
        let transition = match task.await {
            Ok(Ok(payload)) => {
                info!(%job_id, "job completed");
                job.complete(payload.to_value(), now)
            }
            Ok(Err(e)) => {
                warn!(%job_id, error = %e, "job failed");
                job.fail(e.to_string(), now)
            }
            Err(join) => {
                error!(%job_id, error = %join, "job task aborted");
                job.fail(UNEXPECTED_FAILURE, now)
            }
        };
        match transition {
            Ok(()) => self.persist(&job).await,
            Err(e) => warn!(%job_id, error = %e, "terminal transition rejected"),
        }
    }

    async fn apply_stage(&self, job: &mut Job, stage: Stage) {
        match job.advance(stage, self.inner.clock.now()) {
            Ok(true) => {
                debug!(job_id = %job.id, %stage, "stage advanced");
                self.persist(job).await;
            }
            Ok(false) => {}
            Err(e) => warn!(job_id = %job.id, error = %e, "stage update ignored"),
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.inner.repository.update_job(job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist job");
        }
    }
}
