//! File-level index mutations.
//!
//! A file is indexed as one title pseudo-chunk plus its content chunks. The
//! provider work (chunking, embedding, tokenizing) happens first; only when
//! all of it succeeded is a single batch committed that replaces every row
//! the file had before.

use super::HybridSearchEngine;
use crate::embedding::{EmbedKind, EmbeddingProvider, TokenCounter};
use crate::error::EmbeddingError;
use crate::search::keyword::KeywordDocument;
use crate::search::types::{
    chunk_id, get_current_timestamp_ms, title_from_path, title_id, validate_dimension,
    ChunkMetadata, EmbeddingData, FileRecord, SearchError, SourceDocument,
};
use crate::storage::WriteBatch;
use tracing::{info, instrument, warn};

/// Lets the chunker count tokens through the provider.
struct ProviderCounter<'a>(&'a dyn EmbeddingProvider);

impl TokenCounter for ProviderCounter<'_> {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        self.0.count_tokens(text)
    }
}

/// A file's rows, ready to stage.
struct PreparedFile {
    chunks: Vec<ChunkMetadata>,
    embeddings: Vec<EmbeddingData>,
    content_chunks: usize,
}

impl HybridSearchEngine {
    /// Chunks and embeds `doc`. Touches nothing persistent.
    async fn prepare_file(&self, doc: &SourceDocument) -> Result<PreparedFile, SearchError> {
        let counter = ProviderCounter(self.provider.as_ref());
        let pieces = self.chunker.chunk(&doc.content, &counter)?;

        let title = title_from_path(&doc.path);
        let indexed_at = get_current_timestamp_ms();
        let row = |id: String, content: String, headings: Vec<String>| ChunkMetadata {
            id,
            file_path: doc.path.clone(),
            title: title.clone(),
            content,
            headings,
            mtime: doc.mtime,
            size: doc.size,
            indexed_at,
        };

        let mut chunks = Vec::with_capacity(pieces.len() + 1);
        chunks.push(row(title_id(&doc.path), title.clone(), Vec::new()));
        for (index, piece) in pieces.into_iter().enumerate() {
            chunks.push(row(chunk_id(&doc.path, index), piece.content, piece.headings));
        }

        // Title and chunks go to the provider in one call
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.provider.embed(&texts, EmbedKind::Document).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            }
            .into());
        }
        for vector in &vectors {
            validate_dimension(self.dimension(), vector.len())?;
        }

        let embeddings = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddingData {
                id: chunk.id.clone(),
                embedding,
            })
            .collect();
        let content_chunks = chunks.len() - 1;

        Ok(PreparedFile {
            chunks,
            embeddings,
            content_chunks,
        })
    }

    /// Ids of every row currently stored for `path`.
    async fn stored_ids(&self, path: &str) -> Result<Vec<String>, SearchError> {
        Ok(self
            .store
            .chunks_for_file(path)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }

    /// Stages deletion of `removed` and the rows of `prepared`, then commits.
    async fn commit_file(
        &self,
        doc: &SourceDocument,
        prepared: PreparedFile,
        removed: Vec<String>,
        mut batch: WriteBatch,
    ) -> Result<(), SearchError> {
        let keyword_docs: Vec<KeywordDocument> = prepared
            .chunks
            .iter()
            .map(|c| KeywordDocument::new(c.id.clone(), c.content.clone()))
            .collect();
        self.keyword
            .stage_update(&removed, &keyword_docs, &mut batch)
            .await?;

        for id in &removed {
            batch.delete_chunk(id.clone());
            batch.delete_embedding(id.clone());
        }
        for chunk in prepared.chunks {
            batch.put_chunk(chunk);
        }
        for data in &prepared.embeddings {
            batch.put_embedding(data.id.clone(), data.embedding.clone());
        }
        batch.put_file(FileRecord {
            file_path: doc.path.clone(),
            mtime: doc.mtime,
            size: doc.size,
            indexed_at: get_current_timestamp_ms(),
            chunk_count: prepared.content_chunks,
            failure_count: 0,
            last_error: None,
        });

        self.store.apply(batch).await?;

        // Committed: bring the in-memory views in line
        self.keyword.invalidate();
        self.vectors.apply_changes(&removed, prepared.embeddings)?;
        Ok(())
    }

    /// Indexes (or re-indexes) one file and returns its content chunk count.
    ///
    /// On any failure the previous rows of the file stay untouched, the
    /// failure is recorded on the file record, and the error is returned.
    #[instrument(skip_all, fields(path = %doc.path, bytes = doc.content.len()))]
    pub async fn index_file(&self, doc: &SourceDocument) -> Result<usize, SearchError> {
        let _guard = self.write_lock.lock().await;

        let result = async {
            let prepared = self.prepare_file(doc).await?;
            let count = prepared.content_chunks;
            let removed = self.stored_ids(&doc.path).await?;
            self.commit_file(doc, prepared, removed, WriteBatch::new())
                .await?;
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => {
                info!("Indexed {} ({} chunks)", doc.path, count);
                Ok(count)
            }
            Err(e) => {
                self.note_failure(&doc.path, doc.mtime, doc.size, &e).await;
                Err(e)
            }
        }
    }

    /// Removes every row of `path` in one transaction.
    ///
    /// Returns false (and writes nothing) when the path is unknown.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn delete_file(&self, path: &str) -> Result<bool, SearchError> {
        let _guard = self.write_lock.lock().await;

        let removed = self.stored_ids(path).await?;
        let known = self.store.get_file(path).await?.is_some();
        if removed.is_empty() && !known {
            return Ok(false);
        }

        let mut batch = WriteBatch::new();
        self.keyword.stage_update(&removed, &[], &mut batch).await?;
        for id in &removed {
            batch.delete_chunk(id.clone());
            batch.delete_embedding(id.clone());
        }
        batch.delete_file(path);
        self.store.apply(batch).await?;

        self.keyword.invalidate();
        self.vectors.apply_changes(&removed, Vec::new())?;
        info!("Deleted {} ({} rows)", path, removed.len());
        Ok(true)
    }

    /// Moves a file: drops `old_path` and indexes `doc` in one transaction.
    #[instrument(skip_all, fields(from = %old_path, to = %doc.path))]
    pub async fn rename_file(
        &self,
        old_path: &str,
        doc: &SourceDocument,
    ) -> Result<usize, SearchError> {
        let _guard = self.write_lock.lock().await;

        let result = async {
            let prepared = self.prepare_file(doc).await?;
            let count = prepared.content_chunks;
            let mut removed = self.stored_ids(old_path).await?;
            if old_path != doc.path {
                removed.extend(self.stored_ids(&doc.path).await?);
            }
            let mut batch = WriteBatch::new();
            if old_path != doc.path {
                batch.delete_file(old_path);
            }
            self.commit_file(doc, prepared, removed, batch).await?;
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => {
                info!("Renamed {} -> {}", old_path, doc.path);
                Ok(count)
            }
            Err(e) => {
                self.note_failure(&doc.path, doc.mtime, doc.size, &e).await;
                Err(e)
            }
        }
    }

    /// Records a failed attempt for `path` and returns the attempt count.
    ///
    /// Attempts accumulate while the file keeps the same mtime and size; a
    /// changed file starts counting again.
    pub async fn record_failure(
        &self,
        path: &str,
        mtime: u64,
        size: u64,
        error: &str,
    ) -> Result<u32, SearchError> {
        let _guard = self.write_lock.lock().await;
        self.record_failure_locked(path, mtime, size, error).await
    }

    async fn record_failure_locked(
        &self,
        path: &str,
        mtime: u64,
        size: u64,
        error: &str,
    ) -> Result<u32, SearchError> {
        let mut record = self.store.get_file(path).await?.unwrap_or(FileRecord {
            file_path: path.to_string(),
            ..FileRecord::default()
        });
        record.failure_count = if record.matches(mtime, size) {
            record.failure_count + 1
        } else {
            1
        };
        record.mtime = mtime;
        record.size = size;
        record.last_error = Some(error.to_string());
        let attempts = record.failure_count;

        let mut batch = WriteBatch::new();
        batch.put_file(record);
        self.store.apply(batch).await?;
        Ok(attempts)
    }

    /// Best-effort failure bookkeeping while the write lock is held.
    async fn note_failure(&self, path: &str, mtime: u64, size: u64, error: &SearchError) {
        match self
            .record_failure_locked(path, mtime, size, &error.to_string())
            .await
        {
            Ok(attempts) => warn!("Indexing {} failed (attempt {}): {}", path, attempts, error),
            Err(record_err) => warn!(
                "Indexing {} failed: {} (could not record failure: {})",
                path, error, record_err
            ),
        }
    }
}
