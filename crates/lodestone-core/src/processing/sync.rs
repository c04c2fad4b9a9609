//! Applies a batch of file operations to the engine.

use super::progress::{BatchProgress, ProgressTimer};
use crate::config::EngineConfig;
use crate::search::{FileRecord, HybridSearchEngine, SearchError, SourceDocument};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One change reported by the document source.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    /// File is new or may have changed
    Upsert(SourceDocument),
    /// File no longer exists
    Delete(String),
    /// File moved from `from` to `doc.path`
    Rename { from: String, doc: SourceDocument },
}

impl FileOperation {
    /// Path the operation reports progress under.
    pub fn path(&self) -> &str {
        match self {
            FileOperation::Upsert(doc) => &doc.path,
            FileOperation::Delete(path) => path,
            FileOperation::Rename { doc, .. } => &doc.path,
        }
    }
}

/// A file that could not be synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
    /// Failed attempts recorded for the file's current version
    pub attempts: u32,
}

/// Outcome counts of one [`SyncPipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Files (re)indexed, renames included
    pub indexed: usize,
    /// Unchanged files, files past their retry budget, and unknown deletes
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Attempts on files that had failed before
    pub retried: usize,
    pub failures: Vec<FileFailure>,
    pub elapsed_ms: u64,
}

enum Applied {
    Indexed { chunks: usize, retry: bool },
    Deleted,
    Skipped,
}

/// Drives [`HybridSearchEngine`] mutations for a batch of file operations.
pub struct SyncPipeline {
    engine: Arc<HybridSearchEngine>,
    max_retries: u32,
}

impl SyncPipeline {
    /// Creates a pipeline that gives up on an unchanged file after
    /// `max_retries` failed attempts.
    pub fn new(engine: Arc<HybridSearchEngine>, max_retries: u32) -> Self {
        Self {
            engine,
            max_retries,
        }
    }

    pub fn from_config(engine: Arc<HybridSearchEngine>, config: &EngineConfig) -> Self {
        Self::new(engine, config.max_retries)
    }

    pub fn engine(&self) -> &Arc<HybridSearchEngine> {
        &self.engine
    }

    /// Applies `ops` in order, calling `on_progress` after each one.
    ///
    /// Never fails as a whole: per-file errors are collected in the summary.
    #[instrument(skip_all, fields(ops = ops.len()))]
    pub async fn run<F>(&self, ops: Vec<FileOperation>, mut on_progress: F) -> SyncSummary
    where
        F: FnMut(&BatchProgress),
    {
        let timer = ProgressTimer::new();
        let mut summary = SyncSummary::default();
        let mut progress = BatchProgress::new(ops.len());

        for op in ops {
            let path = op.path().to_string();
            let (chunks, failed) = match self.apply(&op).await {
                Ok(Applied::Indexed { chunks, retry }) => {
                    summary.indexed += 1;
                    if retry {
                        summary.retried += 1;
                    }
                    (chunks, false)
                }
                Ok(Applied::Deleted) => {
                    summary.deleted += 1;
                    (0, false)
                }
                Ok(Applied::Skipped) => {
                    summary.skipped += 1;
                    (0, false)
                }
                Err((error, retry)) => {
                    if retry {
                        summary.retried += 1;
                    }
                    let attempts = self.attempts(&path).await;
                    warn!("Sync failed for {}: {}", path, error);
                    summary.failed += 1;
                    summary.failures.push(FileFailure {
                        path: path.clone(),
                        error: error.to_string(),
                        attempts,
                    });
                    (0, true)
                }
            };

            progress.advance(path, chunks, failed, timer.elapsed_ms());
            on_progress(&progress);
        }

        summary.elapsed_ms = timer.elapsed_ms();
        info!(
            "Sync finished: {} indexed, {} skipped, {} deleted, {} failed in {}ms",
            summary.indexed, summary.skipped, summary.deleted, summary.failed, summary.elapsed_ms
        );
        summary
    }

    /// Applies one operation. The error side carries whether it was a retry.
    async fn apply(&self, op: &FileOperation) -> Result<Applied, (SearchError, bool)> {
        match op {
            FileOperation::Upsert(doc) => {
                let record = self
                    .engine
                    .file_record(&doc.path)
                    .await
                    .map_err(|e| (e, false))?;
                let retry = match self.plan(record.as_ref(), doc) {
                    Plan::Skip => return Ok(Applied::Skipped),
                    Plan::Index { retry } => retry,
                };
                let chunks = self
                    .engine
                    .index_file(doc)
                    .await
                    .map_err(|e| (e, retry))?;
                Ok(Applied::Indexed { chunks, retry })
            }
            FileOperation::Delete(path) => match self.engine.delete_file(path).await {
                Ok(true) => Ok(Applied::Deleted),
                Ok(false) => Ok(Applied::Skipped),
                Err(e) => Err((e, false)),
            },
            FileOperation::Rename { from, doc } => {
                let chunks = self
                    .engine
                    .rename_file(from, doc)
                    .await
                    .map_err(|e| (e, false))?;
                Ok(Applied::Indexed {
                    chunks,
                    retry: false,
                })
            }
        }
    }

    fn plan(&self, record: Option<&FileRecord>, doc: &SourceDocument) -> Plan {
        let Some(record) = record else {
            return Plan::Index { retry: false };
        };
        if !record.matches(doc.mtime, doc.size) {
            return Plan::Index { retry: false };
        }
        if record.failure_count == 0 {
            if record.indexed_at > 0 {
                return Plan::Skip;
            }
            return Plan::Index { retry: false };
        }
        if record.failure_count >= self.max_retries {
            debug!(
                "Skipping {} after {} failed attempts",
                doc.path, record.failure_count
            );
            return Plan::Skip;
        }
        Plan::Index { retry: true }
    }

    async fn attempts(&self, path: &str) -> u32 {
        match self.engine.file_record(path).await {
            Ok(Some(record)) => record.failure_count,
            _ => 0,
        }
    }
}

enum Plan {
    Skip,
    Index { retry: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkerConfig;
    use crate::config::DEFAULT_MAX_RETRIES;
    use crate::storage::InMemoryDocumentStore;
    use crate::test_utils::MockProvider;
    use std::sync::Mutex;

    async fn setup() -> (SyncPipeline, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::default());
        let engine = HybridSearchEngine::open(
            Arc::new(InMemoryDocumentStore::new()),
            provider.clone(),
            ChunkerConfig::default(),
        )
        .await
        .unwrap();
        (
            SyncPipeline::new(Arc::new(engine), DEFAULT_MAX_RETRIES),
            provider,
        )
    }

    fn upsert(path: &str, text: &str, mtime: u64) -> FileOperation {
        FileOperation::Upsert(SourceDocument::new(path, text, mtime))
    }

    #[tokio::test]
    async fn test_sync_counts_and_progress() {
        let (pipeline, provider) = setup().await;
        provider.fail_on("POISON");

        let seen = Mutex::new(Vec::new());
        let summary = pipeline
            .run(
                vec![
                    upsert("a.md", "Cars on the road", 1),
                    upsert("b.md", "Bread and flour", 1),
                    upsert("bad.md", "POISON text", 1),
                ],
                |p| seen.lock().unwrap().push(p.clone()),
            )
            .await;

        assert_eq!(summary.indexed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, "bad.md");
        assert_eq!(summary.failures[0].attempts, 1);
        assert!(summary.failures[0].error.contains("POISON"));

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].files_completed, 3);
        assert_eq!(seen[2].files_failed, 1);
        assert_eq!(seen[2].total_chunks, 2);
        assert_eq!(seen[2].current_file.as_deref(), Some("bad.md"));
    }

    #[tokio::test]
    async fn test_unchanged_files_are_skipped() {
        let (pipeline, provider) = setup().await;
        let ops = vec![upsert("a.md", "Cars", 1), upsert("b.md", "Bread", 1)];
        pipeline.run(ops.clone(), |_| {}).await;
        let calls = provider
            .embed_calls
            .load(std::sync::atomic::Ordering::SeqCst);

        let summary = pipeline.run(ops, |_| {}).await;
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.indexed, 0);
        assert_eq!(
            provider
                .embed_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            calls
        );

        // A new mtime is a change
        let summary = pipeline.run(vec![upsert("a.md", "Cars", 2)], |_| {}).await;
        assert_eq!(summary.indexed, 1);
    }

    #[tokio::test]
    async fn test_failing_file_retried_until_budget_spent() {
        let (pipeline, provider) = setup().await;
        provider.fail_on("POISON");
        let op = vec![upsert("bad.md", "POISON", 1)];

        let first = pipeline.run(op.clone(), |_| {}).await;
        assert_eq!((first.failed, first.retried), (1, 0));

        let second = pipeline.run(op.clone(), |_| {}).await;
        assert_eq!((second.failed, second.retried), (1, 1));
        assert_eq!(second.failures[0].attempts, 2);

        let third = pipeline.run(op.clone(), |_| {}).await;
        assert_eq!(third.failures[0].attempts, 3);

        // Budget of 3 spent: skipped until the file changes
        let fourth = pipeline.run(op, |_| {}).await;
        assert_eq!((fourth.skipped, fourth.failed), (1, 0));

        let changed = pipeline
            .run(vec![upsert("bad.md", "fixed now", 2)], |_| {})
            .await;
        assert_eq!(changed.indexed, 1);
        let record = pipeline.engine().file_record("bad.md").await.unwrap().unwrap();
        assert_eq!(record.failure_count, 0);
        assert!(record.last_error.is_none());
    }

    #[tokio::test]
    async fn test_delete_and_rename() {
        let (pipeline, _) = setup().await;
        pipeline
            .run(
                vec![upsert("a.md", "Cars", 1), upsert("b.md", "Bread", 1)],
                |_| {},
            )
            .await;

        let summary = pipeline
            .run(
                vec![
                    FileOperation::Delete("a.md".into()),
                    FileOperation::Delete("never-seen.md".into()),
                    FileOperation::Rename {
                        from: "b.md".into(),
                        doc: SourceDocument::new("kitchen/b.md", "Bread", 1),
                    },
                ],
                |_| {},
            )
            .await;

        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.indexed, 1);

        let stats = pipeline.engine().get_stats().await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert!(pipeline
            .engine()
            .file_record("kitchen/b.md")
            .await
            .unwrap()
            .is_some());
    }
}
