//! Publishing pipeline outputs as artifacts.
//!
//! Each output is registered and then written to the blob store. When a
//! bundle was planned, the outputs are also collected into a ZIP that is
//! stored and registered last, under the same category as its entries.
//!
//! Registration comes before the write: the record claims the
//! `(category, filename)` pair, so a colliding name fails before any bytes
//! reach a path another artifact owns. If any step of a batch fails, every
//! artifact the batch already published is discarded again.

use crate::archive::{self, Entry};
use crate::error::FileOpsError;
use crate::model::{Artifact, Category, Stage};
use crate::output::{format_expiry, Download, ResultPayload};
use crate::pipeline::{blocking, BundlePlan, Layout, OutputFile, OutputMeta, PipelineOutput};
use crate::progress::ProgressSink;
use crate::storage::ArtifactStore;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ArtifactPublisher {
    artifacts: ArtifactStore,
    public_base_url: String,
}

impl ArtifactPublisher {
    pub fn new(artifacts: ArtifactStore, public_base_url: impl Into<String>) -> Self {
        Self {
            artifacts,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// `{base}/download/{category}/{filename}`
    pub fn download_url(&self, category: &str, filename: &str) -> String {
        format!("{}/download/{category}/{filename}", self.public_base_url)
    }

    fn describe(&self, artifact: &Artifact, meta: OutputMeta) -> Download {
        Download {
            filename: artifact.filename.clone(),
            download_url: self.download_url(&artifact.category, &artifact.filename),
            url: self.artifacts.blobs().public_url(&artifact.storage_path),
            expires_at: format_expiry(artifact.expires_at),
            range: meta.range,
            page: meta.page,
            source: meta.source,
        }
    }

    /// Register, then write the blob. A failed write discards the record.
    async fn store(
        &self,
        filename: &str,
        category: Category,
        bytes: &[u8],
    ) -> Result<Artifact, FileOpsError> {
        let path = format!("{category}/{filename}");
        let artifact = self
            .artifacts
            .register(filename, category.as_str(), &path, bytes.len() as u64)
            .await?;
        if let Err(e) = self.artifacts.blobs().put(&path, bytes).await {
            self.artifacts.discard(&artifact).await;
            return Err(e.into());
        }
        Ok(artifact)
    }

    pub async fn publish(
        &self,
        output: PipelineOutput,
        progress: &dyn ProgressSink,
    ) -> Result<ResultPayload, FileOpsError> {
        match output.layout {
            Layout::Single { extras } => {
                let file = output.files.into_iter().next().ok_or_else(|| {
                    FileOpsError::Internal("pipeline produced no output file".into())
                })?;
                let artifact = self.store(&file.filename, file.category, &file.bytes).await?;
                Ok(ResultPayload::Single {
                    download: self.describe(&artifact, file.meta),
                    extras,
                })
            }
            Layout::Batch { key, bundle } => {
                let mut published = Vec::with_capacity(output.files.len() + 1);
                let result = self
                    .publish_batch(output.files, bundle, progress, &mut published)
                    .await;
                match result {
                    Ok((files, zip)) => Ok(ResultPayload::Batch { key, files, zip }),
                    Err(e) => {
                        warn!(discarded = published.len(), error = %e, "batch publish failed");
                        for artifact in &published {
                            self.artifacts.discard(artifact).await;
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    async fn publish_batch(
        &self,
        outputs: Vec<OutputFile>,
        plan: Option<BundlePlan>,
        progress: &dyn ProgressSink,
        published: &mut Vec<Artifact>,
    ) -> Result<(Vec<Download>, Option<Download>), FileOpsError> {
        let mut files = Vec::with_capacity(outputs.len());
        let mut entries = Vec::new();

        for file in outputs {
            let artifact = self.store(&file.filename, file.category, &file.bytes).await?;
            files.push(self.describe(&artifact, file.meta));
            published.push(artifact);
            if plan.is_some() {
                entries.push((file.filename, file.bytes));
            }
        }

        let Some(plan) = plan else {
            return Ok((files, None));
        };
        progress.stage(Stage::Zipping);
        let count = entries.len();
        let bytes = blocking(move || {
            archive::bundle(
                entries
                    .iter()
                    .map(|(name, bytes)| (name.as_str(), Entry::Bytes(bytes))),
            )
        })
        .await?;
        let artifact = self.store(&plan.filename, plan.category, &bytes).await?;
        debug!(filename = %plan.filename, entries = count, "bundle published");
        let zip = self.describe(&artifact, OutputMeta::default());
        published.push(artifact);
        Ok((files, Some(zip)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pipeline::{BundlePlan, OutputFile};
    use crate::progress::NoopProgress;
    use crate::storage::{FsBlobStore, MemoryRepository};
    use chrono::{Duration, Utc};
    use std::io::Read;
    use std::sync::Arc;

    fn publisher(dir: &std::path::Path) -> (ArtifactPublisher, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::new());
        let store = ArtifactStore::new(
            repo.clone(),
            Arc::new(FsBlobStore::new(dir, "http://files.test")),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::hours(2),
        );
        (ArtifactPublisher::new(store, "http://files.test/"), repo)
    }

    #[tokio::test]
    async fn batch_with_bundle_registers_every_file_and_the_zip() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, repo) = publisher(dir.path());
        let files = vec![
            OutputFile::new("a.pdf".into(), Category::Split, b"AAA".to_vec()),
            OutputFile::new("b.pdf".into(), Category::Split, b"BBBB".to_vec()),
            OutputFile::new("c.pdf".into(), Category::Split, b"CC".to_vec()),
        ];
        let plan = BundlePlan {
            filename: "doc-split-XXXXXXXX.zip".into(),
            category: Category::Split,
        };
        let output = PipelineOutput::batch(files, "split_pdfs", Some(plan));

        let payload = publisher.publish(output, &NoopProgress).await.unwrap();
        assert_eq!(repo.artifact_count().await, 4);

        let ResultPayload::Batch { files, zip, .. } = &payload else {
            panic!("expected batch");
        };
        assert_eq!(files.len(), 3);
        let zip = zip.as_ref().unwrap();
        assert_eq!(
            zip.download_url,
            "http://files.test/download/split/doc-split-XXXXXXXX.zip"
        );
        assert_eq!(zip.url, "http://files.test/storage/split/doc-split-XXXXXXXX.zip");

        let bytes = publisher
            .artifacts()
            .blobs()
            .get("split/doc-split-XXXXXXXX.zip")
            .await
            .unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut b = Vec::new();
        archive.by_name("b.pdf").unwrap().read_to_end(&mut b).unwrap();
        assert_eq!(b, b"BBBB");
    }

    #[tokio::test]
    async fn single_output_has_no_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, repo) = publisher(dir.path());
        let output = PipelineOutput::single(
            OutputFile::new("m.pdf".into(), Category::Merged, b"%PDF".to_vec()),
            serde_json::Map::new(),
        );
        let payload = publisher.publish(output, &NoopProgress).await.unwrap();
        assert_eq!(repo.artifact_count().await, 1);
        assert_eq!(payload.to_value()["filename"], serde_json::json!("m.pdf"));
    }

    #[tokio::test]
    async fn colliding_name_leaves_the_live_artifact_intact() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, repo) = publisher(dir.path());
        publisher.store("x.png", Category::Tuned, b"first").await.unwrap();

        let second = publisher.store("x.png", Category::Tuned, b"second").await;
        assert!(second.is_err());

        let live = publisher.artifacts().resolve("tuned", "x.png").await.unwrap();
        let bytes = publisher.artifacts().blobs().get(&live.storage_path).await.unwrap();
        assert_eq!(bytes, b"first");
        assert_eq!(repo.artifact_count().await, 1);
    }

    #[tokio::test]
    async fn failed_batch_discards_what_it_already_published() {
        let dir = tempfile::tempdir().unwrap();
        let (publisher, repo) = publisher(dir.path());
        publisher.store("b.png", Category::ImgPng, b"older").await.unwrap();

        let files = vec![
            OutputFile::new("a.png".into(), Category::ImgPng, b"A".to_vec()),
            OutputFile::new("b.png".into(), Category::ImgPng, b"B".to_vec()),
        ];
        let plan = BundlePlan {
            filename: "a-img-png-XXXXXXXX.zip".into(),
            category: Category::ImgPng,
        };
        let output = PipelineOutput::batch(files, "files", Some(plan));
        assert!(publisher.publish(output, &NoopProgress).await.is_err());

        assert_eq!(repo.artifact_count().await, 1);
        assert!(!publisher.artifacts().blobs().exists("img-png/a.png").await.unwrap());
        let older = publisher.artifacts().resolve("img-png", "b.png").await.unwrap();
        assert_eq!(
            publisher.artifacts().blobs().get(&older.storage_path).await.unwrap(),
            b"older"
        );
    }
}
