//! Dispatch, background execution and artifact lifecycle, driven through
//! the library API with fake PDF collaborators.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::*;
use edgequake_fileops::engine::PdfNormalizer;
use edgequake_fileops::jobs::QueuedJob;
use edgequake_fileops::storage::RepositoryError;
use edgequake_fileops::{
    Artifact, ArtifactPublisher, ArtifactStore, Dispatch, ErrorKind, FsBlobStore, Job,
    JobExecutor, JobStatus, ManualClock, MemoryRepository, Operation, PageRanges, Repository,
    ResultPayload, Stage, WorkerPool,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

// ── Harness ──────────────────────────────────────────────────────────────

/// Records every stage written by `update_job`.
struct RecordingRepository {
    inner: MemoryRepository,
    stages: Mutex<Vec<Stage>>,
}

impl RecordingRepository {
    fn stages(&self) -> Vec<Stage> {
        self.stages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Repository for RecordingRepository {
    async fn insert_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        self.inner.insert_artifact(artifact).await
    }
    async fn find_artifact(
        &self,
        category: &str,
        filename: &str,
    ) -> Result<Option<Artifact>, RepositoryError> {
        self.inner.find_artifact(category, filename).await
    }
    async fn increment_downloads(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.inner.increment_downloads(id).await
    }
    async fn list_expired_artifacts(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Artifact>, RepositoryError> {
        self.inner.list_expired_artifacts(cutoff).await
    }
    async fn delete_artifact(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.inner.delete_artifact(id).await
    }
    async fn insert_job(&self, job: &Job) -> Result<(), RepositoryError> {
        self.inner.insert_job(job).await
    }
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, RepositoryError> {
        self.inner.get_job(id).await
    }
    async fn update_job(&self, job: &Job) -> Result<(), RepositoryError> {
        self.stages.lock().unwrap().push(job.progress_stage);
        self.inner.update_job(job).await
    }
    async fn delete_jobs_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        self.inner.delete_jobs_created_before(cutoff).await
    }
}

struct Harness {
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    repo: Arc<RecordingRepository>,
    artifacts: ArtifactStore,
    executor: JobExecutor,
    queue: UnboundedReceiver<QueuedJob>,
}

fn harness(threshold: u64, normalizer: Arc<dyn PdfNormalizer>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let repo = Arc::new(RecordingRepository {
        inner: MemoryRepository::new(),
        stages: Mutex::new(Vec::new()),
    });
    let artifacts = ArtifactStore::new(
        repo.clone(),
        Arc::new(FsBlobStore::new(dir.path().join("storage"), "http://files.test")),
        clock.clone(),
        Duration::hours(2),
    );
    let publisher = ArtifactPublisher::new(artifacts.clone(), "http://files.test");
    let (executor, queue) = JobExecutor::new(
        repo.clone(),
        clock.clone(),
        toolkit(dir.path(), normalizer),
        publisher,
        threshold,
    );
    Harness {
        dir,
        clock,
        repo,
        artifacts,
        executor,
        queue,
    }
}

impl Harness {
    fn split(&self, pages: usize, ranges: &str) -> Operation {
        Operation::SplitPdf {
            pdf: upload(self.dir.path(), "Annual Report.pdf", &numbered_doc("p", pages)),
            ranges: PageRanges::parse(ranges).unwrap(),
        }
    }

    async fn artifact_count(&self) -> usize {
        self.repo.inner.artifact_count().await
    }

    /// Submit above the threshold and run the queued job on this task.
    async fn run_in_background(&mut self, op: Operation) -> Job {
        let Dispatch::Queued { job_id } = self.executor.submit(op).await.unwrap() else {
            panic!("expected a queued job");
        };
        let queued = self.queue.recv().await.unwrap();
        assert_eq!(queued.job_id, job_id);
        self.executor.execute(queued).await;
        self.executor.job(job_id).await.unwrap()
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn above_threshold_creates_pending_job_without_running_pipeline() {
    let normalizer = Arc::new(CopyNormalizer::default());
    let mut h = harness(4, normalizer.clone());

    let dispatch = h.executor.submit(h.split(3, "1")).await.unwrap();
    let Dispatch::Queued { job_id } = dispatch else {
        panic!("expected a queued job, got {dispatch:?}");
    };

    let job = h.executor.job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.progress_stage, Stage::Queued);
    assert_eq!(job.kind.as_str(), "pdf_split");
    assert_eq!(normalizer.calls(), 0);
    assert_eq!(h.artifact_count().await, 0);
    assert!(h.queue.try_recv().is_ok());
}

#[tokio::test]
async fn at_threshold_runs_inline() {
    let doc_len = numbered_doc("p", 2).len() as u64;
    let h = harness(doc_len, Arc::new(CopyNormalizer::default()));

    let dispatch = h.executor.submit(h.split(2, "1-2")).await.unwrap();
    let Dispatch::Inline(ResultPayload::Batch { key, files, zip }) = dispatch else {
        panic!("expected an inline batch");
    };
    assert_eq!(key, "split_pdfs");
    assert_eq!(files.len(), 1);
    assert!(zip.is_none(), "a single range is not bundled");
    assert_eq!(h.repo.inner.job_count().await, 0);
}

// ── Background execution ─────────────────────────────────────────────────

#[tokio::test]
async fn background_split_completes_with_bundle_and_monotonic_stages() {
    let mut h = harness(0, Arc::new(CopyNormalizer::default()));

    let job = h.run_in_background(h.split(2, "1,2")).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_stage, Stage::Completed);

    let result = job.result.unwrap();
    assert_eq!(result["success"], true);
    let files = result["split_pdfs"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["range"], "1");
    assert_eq!(files[1]["range"], "2");
    let zip_name = result["zip"]["filename"].as_str().unwrap();
    assert!(zip_name.starts_with("annual-report-split-"), "{zip_name}");
    assert!(zip_name.ends_with(".zip"));

    // Two split PDFs plus the bundle.
    assert_eq!(h.artifact_count().await, 3);

    assert_eq!(
        h.repo.stages(),
        vec![
            Stage::Uploaded,
            Stage::Normalizing,
            Stage::Splitting,
            Stage::Zipping,
            Stage::Completed
        ]
    );
}

#[tokio::test]
async fn external_tool_failure_fails_job_with_message() {
    let mut h = harness(0, Arc::new(FailingNormalizer));

    let job = h.run_in_background(h.split(3, "1")).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress_stage, Stage::Error);
    let message = job.failure_message().unwrap();
    assert!(message.contains("Normalization failed"), "{message}");
    assert!(message.contains("syntaxerror"), "{message}");
    assert_eq!(h.artifact_count().await, 0);
}

#[tokio::test]
async fn out_of_bounds_range_fails_whole_job() {
    let mut h = harness(0, Arc::new(CopyNormalizer::default()));

    let job = h.run_in_background(h.split(3, "1,2-4")).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.failure_message(),
        Some("Invalid range 2-4. This PDF has 3 pages.")
    );
    assert_eq!(h.artifact_count().await, 0);
}

#[tokio::test]
async fn panic_inside_pipeline_still_fails_job() {
    let mut h = harness(0, Arc::new(PanickingNormalizer));

    let job = h.run_in_background(h.split(2, "1")).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_message(), Some("Processing failed unexpectedly"));
}

#[tokio::test]
async fn worker_pool_drains_queue_on_shutdown() {
    let h = harness(0, Arc::new(CopyNormalizer::default()));
    let Harness {
        dir,
        executor,
        queue,
        ..
    } = h;

    let mut ids = Vec::new();
    for n in 2..=4 {
        let op = Operation::MergePdfs {
            pdfs: vec![
                upload(dir.path(), "a.pdf", &numbered_doc("a", n)),
                upload(dir.path(), "b.pdf", &numbered_doc("b", 1)),
            ],
        };
        match executor.submit(op).await.unwrap() {
            Dispatch::Queued { job_id } => ids.push(job_id),
            other => panic!("expected a queued job, got {other:?}"),
        }
    }

    let pool = WorkerPool::start(executor.clone(), queue, 2);
    pool.shutdown().await;

    for (id, n) in ids.into_iter().zip(2..=4) {
        let job = executor.job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap()["page_count"], n + 1);
    }
}

// ── Pipelines end to end ─────────────────────────────────────────────────

#[tokio::test]
async fn merge_preserves_input_order() {
    let h = harness(u64::MAX, Arc::new(CopyNormalizer::default()));
    let op = Operation::MergePdfs {
        pdfs: vec![
            upload(h.dir.path(), "a.pdf", &numbered_doc("a", 3)),
            upload(h.dir.path(), "b.pdf", &numbered_doc("b", 4)),
        ],
    };

    let Dispatch::Inline(payload) = h.executor.submit(op).await.unwrap() else {
        panic!("expected inline");
    };
    let value = payload.to_value();
    assert_eq!(value["page_count"], 7);

    let filename = value["filename"].as_str().unwrap();
    assert!(filename.starts_with("a-merged-"), "{filename}");
    let artifact = h.artifacts.resolve("merged", filename).await.unwrap();
    let bytes = h.artifacts.blobs().get(&artifact.storage_path).await.unwrap();
    assert_eq!(
        pages_of(&bytes),
        vec!["a1", "a2", "a3", "b1", "b2", "b3", "b4"]
    );
}

#[tokio::test]
async fn split_full_range_then_merge_keeps_page_count() {
    let h = harness(u64::MAX, Arc::new(CopyNormalizer::default()));

    let Dispatch::Inline(ResultPayload::Batch { files, .. }) =
        h.executor.submit(h.split(5, "1-5")).await.unwrap()
    else {
        panic!("expected inline batch");
    };
    let part = h.artifacts.resolve("split", &files[0].filename).await.unwrap();
    let part_bytes = h.artifacts.blobs().get(&part.storage_path).await.unwrap();

    let op = Operation::MergePdfs {
        pdfs: vec![upload(h.dir.path(), "part.pdf", &part_bytes)],
    };
    let Dispatch::Inline(merged) = h.executor.submit(op).await.unwrap() else {
        panic!("expected inline");
    };
    assert_eq!(merged.to_value()["page_count"], 5);
}

#[tokio::test]
async fn inline_failure_surfaces_typed_error() {
    let h = harness(u64::MAX, Arc::new(CopyNormalizer::default()));
    let err = h.executor.submit(h.split(3, "4")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(h.artifact_count().await, 0);
}

// ── Artifact lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn outputs_expire_logically_then_get_swept() {
    let h = harness(u64::MAX, Arc::new(CopyNormalizer::default()));
    let Dispatch::Inline(payload) = h.executor.submit(h.split(2, "1,2")).await.unwrap() else {
        panic!("expected inline");
    };
    let names: Vec<String> = payload
        .downloads()
        .iter()
        .map(|d| d.filename.clone())
        .collect();
    assert_eq!(names.len(), 3);
    for name in &names {
        h.artifacts.resolve("split", name).await.unwrap();
    }

    h.clock.advance(Duration::hours(2) + Duration::seconds(1));
    for name in &names {
        let err = h.artifacts.resolve("split", name).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    // Logically gone, physically still there until the sweep.
    assert_eq!(h.artifact_count().await, 3);

    let report = h.artifacts.sweep_expired().await.unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(h.artifacts.sweep_expired().await.unwrap().deleted, 0);
    assert_eq!(h.artifact_count().await, 0);
}
