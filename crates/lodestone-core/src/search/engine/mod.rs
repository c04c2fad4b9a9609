//! Hybrid search engine combining vector (semantic) and keyword (BM25) search.
//!
//! This module provides the [`HybridSearchEngine`] which orchestrates:
//! - Flat cosine vector search for semantic similarity
//! - BM25 keyword search for exact term matching
//! - Weighted Reciprocal Rank Fusion (RRF) over file rankings
//!
//! # Architecture
//!
//! - **Hot data (in memory)**: embedding partitions, BM25 corpus statistics
//! - **Cold data (in store)**: chunk text, postings, token lists, file records
//!
//! Every file mutation is staged into one [`WriteBatch`](crate::storage::WriteBatch)
//! and committed atomically; in-memory state is updated only after the
//! commit succeeds.
//!
//! # Titles and Content
//!
//! Each file is indexed twice: once per content chunk, and once as a title
//! pseudo-chunk (`path#title`) holding the file stem. Searches rank both
//! fields separately and blend them with the title/content weights.

mod document;
mod query;

#[cfg(test)]
mod tests;

use super::keyword::Bm25Index;
use super::types::{FileRecord, IndexStats, SearchError};
use super::vector::VectorIndex;
use crate::chunking::{ChunkerConfig, ChunkingStrategy, LineChunker};
use crate::embedding::{EmbeddingProvider, Reranker};
use crate::storage::DocumentStore;
use std::sync::Arc;
use tracing::info;

/// Hybrid search engine over a [`DocumentStore`].
///
/// All methods take `&self`: mutations are serialized by an internal async
/// mutex and searches run concurrently with each other. Share it behind an
/// `Arc`.
///
/// # Example
///
/// ```ignore
/// use lodestone_core::search::{HybridSearchEngine, SearchOptions, SourceDocument};
/// use lodestone_core::storage::InMemoryDocumentStore;
///
/// let engine = HybridSearchEngine::open(
///     Arc::new(InMemoryDocumentStore::new()),
///     provider,
///     ChunkerConfig::default(),
/// )
/// .await?;
///
/// engine.index_file(&SourceDocument::new("notes/rust.md", text, mtime)).await?;
/// let results = engine.search("ownership", &SearchOptions::default()).await?;
/// ```
pub struct HybridSearchEngine {
    /// Persistent tables (chunks, embeddings, postings, files)
    pub(crate) store: Arc<dyn DocumentStore>,
    /// Token counting, tokenization and embedding
    pub(crate) provider: Arc<dyn EmbeddingProvider>,
    /// Optional cross-encoder for the rerank pass
    pub(crate) reranker: Option<Arc<dyn Reranker>>,
    pub(crate) chunker: Arc<dyn ChunkingStrategy>,
    pub(crate) keyword: Bm25Index,
    pub(crate) vectors: VectorIndex,
    /// Serializes index mutations
    pub(crate) write_lock: tokio::sync::Mutex<()>,
}

impl HybridSearchEngine {
    /// Opens an engine over `store`, loading existing embeddings into memory.
    ///
    /// Fails if `chunking` is invalid or if stored vectors do not match the
    /// provider's dimension.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        provider: Arc<dyn EmbeddingProvider>,
        chunking: ChunkerConfig,
    ) -> Result<Self, SearchError> {
        chunking.validate()?;
        let dimension = provider.dimension();
        let vectors = VectorIndex::load(store.as_ref(), dimension).await?;
        let keyword = Bm25Index::new(store.clone(), provider.clone());

        let stats = Self::stats_from(&store.list_files().await?);
        info!(
            "Opened index: {} files, {} chunks, dimension {}",
            stats.total_files, stats.total_chunks, dimension
        );

        Ok(Self {
            store,
            provider,
            reranker: None,
            chunker: Arc::new(LineChunker::new(chunking)),
            keyword,
            vectors,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Enables the rerank pass for searches that request it.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Replaces the default line chunker.
    pub fn with_chunker(mut self, chunker: Arc<dyn ChunkingStrategy>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Embedding dimension of the index.
    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    fn stats_from(files: &[FileRecord]) -> IndexStats {
        let indexed = files.iter().filter(|f| f.indexed_at > 0);
        let (total_files, total_chunks) =
            indexed.fold((0, 0), |(n, chunks), f| (n + 1, chunks + f.chunk_count));
        IndexStats {
            total_chunks,
            total_files,
        }
    }

    /// Number of indexed files and content chunks.
    pub async fn get_stats(&self) -> Result<IndexStats, SearchError> {
        Ok(Self::stats_from(&self.store.list_files().await?))
    }

    /// Bookkeeping record of `path`, if it was ever seen.
    pub async fn file_record(&self, path: &str) -> Result<Option<FileRecord>, SearchError> {
        Ok(self.store.get_file(path).await?)
    }

    /// True when `path` has no record, changed on disk, or last failed.
    pub async fn file_needs_update(
        &self,
        path: &str,
        mtime: u64,
        size: u64,
    ) -> Result<bool, SearchError> {
        Ok(match self.store.get_file(path).await? {
            None => true,
            Some(record) => !record.matches(mtime, size) || record.failure_count > 0,
        })
    }

    /// Removes everything from the index.
    pub async fn clear_all(&self) -> Result<(), SearchError> {
        let _guard = self.write_lock.lock().await;
        self.store.clear().await?;
        self.keyword.invalidate();
        self.vectors.clear()?;
        info!("Cleared all index data");
        Ok(())
    }
}
