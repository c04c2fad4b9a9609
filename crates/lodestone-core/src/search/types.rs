//! Records, options and errors shared by the search modules.

use crate::config::{
    CHUNK_ID_SEPARATOR, DEFAULT_BM25_WEIGHT, DEFAULT_CONTENT_WEIGHT, DEFAULT_EMBEDDING_WEIGHT,
    DEFAULT_RETRIEVAL_MULTIPLIER, DEFAULT_TITLE_WEIGHT, DEFAULT_TOP_K, RRF_K, TITLE_ID_SUFFIX,
};
use crate::error::{ChunkingError, EmbeddingError};
use crate::search::aggregation::AggregationConfig;
use crate::storage::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Returns the current Unix timestamp in milliseconds.
///
/// Uses `instant::SystemTime` for cross-platform timing. Returns 0 if the
/// system clock is before the epoch.
pub fn get_current_timestamp_ms() -> u64 {
    instant::SystemTime::now()
        .duration_since(instant::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Identifiers
// =============================================================================

/// Which field of a file an index entry belongs to.
///
/// Title pseudo-chunks and content chunks share one id space and are told
/// apart by the `#title` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Content,
}

impl Field {
    /// Classifies an index id.
    pub fn of_id(id: &str) -> Self {
        match id.rsplit_once(CHUNK_ID_SEPARATOR) {
            Some((_, TITLE_ID_SUFFIX)) => Field::Title,
            _ => Field::Content,
        }
    }

    /// Returns true if `id` belongs to this field.
    pub fn matches(self, id: &str) -> bool {
        Field::of_id(id) == self
    }
}

/// Builds the id of content chunk `index` of `file_path`.
pub fn chunk_id(file_path: &str, index: usize) -> String {
    format!("{}{}{}", file_path, CHUNK_ID_SEPARATOR, index)
}

/// Builds the id of the title pseudo-chunk of `file_path`.
pub fn title_id(file_path: &str) -> String {
    format!("{}{}{}", file_path, CHUNK_ID_SEPARATOR, TITLE_ID_SUFFIX)
}

/// Extracts the file path from a chunk or title id.
///
/// The last separator wins, so paths that themselves contain `#` survive.
pub fn file_path_of(id: &str) -> &str {
    id.rsplit_once(CHUNK_ID_SEPARATOR)
        .map(|(path, _)| path)
        .unwrap_or(id)
}

/// Prefix shared by every id of `file_path` (`path#`).
pub fn id_prefix(file_path: &str) -> String {
    format!("{}{}", file_path, CHUNK_ID_SEPARATOR)
}

/// Derives a display title from a path: the file name without extension.
///
/// # Examples
///
/// ```
/// use lodestone_core::search::types::title_from_path;
///
/// assert_eq!(title_from_path("notes/Rust Ownership.md"), "Rust Ownership");
/// assert_eq!(title_from_path("README"), "README");
/// assert_eq!(title_from_path(".hidden"), ".hidden");
/// ```
pub fn title_from_path(file_path: &str) -> String {
    let name = file_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

// =============================================================================
// Persisted records
// =============================================================================

/// One persisted row per content chunk, plus one per file title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// `path#index` or `path#title`
    pub id: String,
    pub file_path: String,
    pub title: String,
    /// Chunk text (the title itself for the title pseudo-chunk)
    pub content: String,
    /// Heading path in effect at the chunk start
    pub headings: Vec<String>,
    /// Source modification time (ms since epoch)
    pub mtime: u64,
    /// Source size in bytes
    pub size: u64,
    /// When the chunk was written (ms since epoch)
    pub indexed_at: u64,
}

impl ChunkMetadata {
    pub fn field(&self) -> Field {
        Field::of_id(&self.id)
    }
}

/// Occurrence of a token in one indexed chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostingEntry {
    pub doc_id: String,
    pub term_frequency: u32,
}

/// Posting list of one token.
///
/// Invariant: `document_frequency == postings.len()`, and an entry with no
/// postings is deleted rather than stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvertedIndexEntry {
    pub token: u32,
    pub postings: Vec<PostingEntry>,
    pub document_frequency: usize,
}

impl InvertedIndexEntry {
    pub fn new(token: u32) -> Self {
        Self {
            token,
            postings: Vec::new(),
            document_frequency: 0,
        }
    }

    /// Inserts or replaces the posting for `doc_id`.
    pub fn upsert(&mut self, doc_id: &str, term_frequency: u32) {
        match self.postings.iter_mut().find(|p| p.doc_id == doc_id) {
            Some(existing) => existing.term_frequency = term_frequency,
            None => self.postings.push(PostingEntry {
                doc_id: doc_id.to_string(),
                term_frequency,
            }),
        }
        self.document_frequency = self.postings.len();
    }

    /// Removes the posting for `doc_id` if present.
    pub fn remove(&mut self, doc_id: &str) {
        self.postings.retain(|p| p.doc_id != doc_id);
        self.document_frequency = self.postings.len();
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }
}

/// Token list of one indexed chunk.
///
/// Kept so that replacing or deleting a chunk can find the postings it
/// contributed to, and so that index statistics can be rebuilt without
/// re-tokenizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkTokenInfo {
    pub doc_id: String,
    pub tokens: Vec<u32>,
    pub length: usize,
}

impl ChunkTokenInfo {
    pub fn new(doc_id: impl Into<String>, tokens: Vec<u32>) -> Self {
        let length = tokens.len();
        Self {
            doc_id: doc_id.into(),
            tokens,
            length,
        }
    }
}

/// Corpus statistics used by BM25. Derived, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexMetadata {
    pub total_documents: usize,
    pub average_doc_length: f32,
    pub doc_lengths: HashMap<String, usize>,
}

impl IndexMetadata {
    /// Builds statistics from `(doc_id, length)` pairs.
    pub fn from_lengths<I>(lengths: I) -> Self
    where
        I: IntoIterator<Item = (String, usize)>,
    {
        let doc_lengths: HashMap<String, usize> = lengths.into_iter().collect();
        let total_documents = doc_lengths.len();
        let total_length: usize = doc_lengths.values().sum();
        let average_doc_length = if total_documents == 0 {
            0.0
        } else {
            total_length as f32 / total_documents as f32
        };
        Self {
            total_documents,
            average_doc_length,
            doc_lengths,
        }
    }
}

/// Vector stored for one chunk or title id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingData {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// Per-file bookkeeping used by bulk sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FileRecord {
    pub file_path: String,
    pub mtime: u64,
    pub size: u64,
    /// 0 while the file has never been indexed successfully
    pub indexed_at: u64,
    /// Content chunks written by the last successful index
    pub chunk_count: usize,
    /// Consecutive failed attempts since the last success
    pub failure_count: u32,
    pub last_error: Option<String>,
}

impl FileRecord {
    /// True if the record describes the given on-disk state.
    pub fn matches(&self, mtime: u64, size: u64) -> bool {
        self.mtime == mtime && self.size == size
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed_at > 0 && self.failure_count == 0
    }
}

// =============================================================================
// Inputs and outputs
// =============================================================================

/// A file handed to the engine by the document source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub path: String,
    pub content: String,
    /// Modification time (ms since epoch)
    pub mtime: u64,
    /// Size in bytes
    pub size: u64,
}

impl SourceDocument {
    /// Convenience constructor that derives `size` from the content length.
    pub fn new(path: impl Into<String>, content: impl Into<String>, mtime: u64) -> Self {
        let content = content.into();
        let size = content.len() as u64;
        Self {
            path: path.into(),
            content,
            mtime,
            size,
        }
    }
}

/// A scored index id (chunk, title or file path depending on context).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

impl ScoredId {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Best-matching chunk of a result file.
#[derive(Debug, Clone, PartialEq)]
pub struct TopChunk {
    pub content: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// File-level search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub file_path: String,
    pub title: String,
    /// Relevance in `[0, 1]` for fused and reranked searches
    pub score: f32,
    pub top_chunk: Option<TopChunk>,
    /// Content chunks indexed for this file
    pub chunk_count: usize,
    pub file_size: u64,
}

/// Index size summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Content chunks (title pseudo-chunks excluded)
    pub total_chunks: usize,
    pub total_files: usize,
}

// =============================================================================
// Search options
// =============================================================================

/// Weights of the two signals and the two fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub embedding: f32,
    pub bm25: f32,
    pub title: f32,
    pub content: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            embedding: DEFAULT_EMBEDDING_WEIGHT,
            bm25: DEFAULT_BM25_WEIGHT,
            title: DEFAULT_TITLE_WEIGHT,
            content: DEFAULT_CONTENT_WEIGHT,
        }
    }
}

impl FusionWeights {
    /// Rejects negative or non-finite weights and all-zero pairs.
    pub fn validate(&self) -> Result<(), SearchError> {
        for (name, value) in [
            ("embedding", self.embedding),
            ("bm25", self.bm25),
            ("title", self.title),
            ("content", self.content),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SearchError::InvalidQuery(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.embedding == 0.0 && self.bm25 == 0.0 {
            return Err(SearchError::InvalidQuery(
                "embedding and bm25 weights are both zero".to_string(),
            ));
        }
        if self.title == 0.0 && self.content == 0.0 {
            return Err(SearchError::InvalidQuery(
                "title and content weights are both zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-query options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Files to return
    pub top_k: usize,
    /// Chunk candidates per signal = `top_k * retrieval_multiplier`
    pub retrieval_multiplier: usize,
    pub weights: FusionWeights,
    /// How BM25 chunk scores collapse to file scores
    pub bm25_aggregation: AggregationConfig,
    /// How vector chunk scores collapse to file scores
    pub vector_aggregation: AggregationConfig,
    /// RRF constant for hybrid fusion
    pub rrf_k: usize,
    /// Run the reranker over the merged candidates (needs a configured reranker)
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            retrieval_multiplier: DEFAULT_RETRIEVAL_MULTIPLIER,
            weights: FusionWeights::default(),
            bm25_aggregation: AggregationConfig::bm25_default(),
            vector_aggregation: AggregationConfig::vector_default(),
            rrf_k: RRF_K,
            rerank: false,
        }
    }
}

impl SearchOptions {
    /// Chunk candidates fetched per signal and field.
    pub fn candidate_pool(&self) -> usize {
        self.top_k.saturating_mul(self.retrieval_multiplier.max(1))
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        self.weights.validate()?;
        if self.top_k == 0 {
            return Err(SearchError::InvalidQuery("top_k must be at least 1".into()));
        }
        self.bm25_aggregation.validate()?;
        self.vector_aggregation.validate()?;
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur during indexing and search.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    /// Storage transaction or lookup failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Token/embedding provider failed
    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    /// Chunking rejected its configuration or could not size text
    #[error("Chunking error: {0}")]
    ChunkingError(String),

    /// Reranker failed
    #[error("Rerank error: {0}")]
    RerankError(String),

    /// Vector dimension does not match the index
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Query options rejected before any work was done
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        SearchError::StorageError(err.to_string())
    }
}

impl From<EmbeddingError> for SearchError {
    fn from(err: EmbeddingError) -> Self {
        SearchError::EmbeddingError(err.to_string())
    }
}

impl From<ChunkingError> for SearchError {
    fn from(err: ChunkingError) -> Self {
        SearchError::ChunkingError(err.to_string())
    }
}

/// Validates that an embedding has the expected dimension.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<(), SearchError> {
    if expected != actual {
        return Err(SearchError::DimensionMismatch { expected, actual });
    }
    Ok(())
}
