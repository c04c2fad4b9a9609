//! Document store trait for KV-based index storage.
//!
//! This module provides the [`DocumentStore`] trait which abstracts over
//! storage backends (redb on disk, an in-memory map for tests and ephemeral
//! indexes).
//!
//! Reads are individual lookups or prefix scans; every mutation goes through
//! [`DocumentStore::apply`], which commits a [`WriteBatch`] all-or-nothing.

use crate::search::types::{
    id_prefix, ChunkMetadata, ChunkTokenInfo, EmbeddingData, FileRecord, InvertedIndexEntry,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key/document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error (filesystem)
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Database error (redb, lock poisoning)
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The on-disk schema is newer than this build understands
    #[error("Schema version {found} is not supported (newest supported: {supported})")]
    SchemaMismatch { found: u32, supported: u32 },

    /// Store not initialized
    #[error("Store not initialized")]
    NotInitialized,
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    PutChunk(ChunkMetadata),
    DeleteChunk(String),
    PutEmbedding { id: String, embedding: Vec<f32> },
    DeleteEmbedding(String),
    /// Replaces the whole postings entry for `entry.token`
    PutPosting(InvertedIndexEntry),
    DeletePosting(u32),
    PutTokenInfo(ChunkTokenInfo),
    DeleteTokenInfo(String),
    PutFile(FileRecord),
    DeleteFile(String),
}

/// An ordered set of mutations committed atomically.
///
/// Later ops on the same key win. Components stage their changes into a
/// shared batch so one file update lands as a single transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn put_chunk(&mut self, chunk: ChunkMetadata) {
        self.push(WriteOp::PutChunk(chunk));
    }

    pub fn delete_chunk(&mut self, id: impl Into<String>) {
        self.push(WriteOp::DeleteChunk(id.into()));
    }

    pub fn put_embedding(&mut self, id: impl Into<String>, embedding: Vec<f32>) {
        self.push(WriteOp::PutEmbedding {
            id: id.into(),
            embedding,
        });
    }

    pub fn delete_embedding(&mut self, id: impl Into<String>) {
        self.push(WriteOp::DeleteEmbedding(id.into()));
    }

    pub fn put_file(&mut self, record: FileRecord) {
        self.push(WriteOp::PutFile(record));
    }

    pub fn delete_file(&mut self, path: impl Into<String>) {
        self.push(WriteOp::DeleteFile(path.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Storage for chunks, embeddings, the inverted index and file records.
///
/// # Design Notes
///
/// - Mutations are only exposed as [`apply`](DocumentStore::apply) so that a
///   file update (chunks, embeddings, postings, file record) is one commit.
/// - Chunk ids are `path#suffix`, so the chunks of a file are a key-prefix
///   range; [`chunks_for_file`](DocumentStore::chunks_for_file) uses that.
/// - Batch reads skip missing keys rather than failing.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    // =========================================================================
    // Chunk Operations
    // =========================================================================

    /// Retrieves a chunk by ID.
    ///
    /// Returns `Ok(None)` if the chunk doesn't exist.
    async fn get_chunk(&self, id: &str) -> Result<Option<ChunkMetadata>, StoreError>;

    /// Retrieves multiple chunks in input order, skipping missing ones.
    async fn get_chunks_batch(&self, ids: &[String]) -> Result<Vec<ChunkMetadata>, StoreError>;

    /// All chunks (title and content) belonging to `file_path`.
    async fn chunks_for_file(&self, file_path: &str) -> Result<Vec<ChunkMetadata>, StoreError>;

    /// Total number of chunk rows, title chunks included.
    async fn chunk_count(&self) -> Result<usize, StoreError>;

    // =========================================================================
    // Embedding Operations
    // =========================================================================

    async fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>, StoreError>;

    /// Loads every stored embedding, used to rebuild the in-memory vector index.
    async fn iter_embeddings(&self) -> Result<Vec<EmbeddingData>, StoreError>;

    // =========================================================================
    // Inverted Index Operations
    // =========================================================================

    /// Postings entries for the given tokens; tokens without an entry are skipped.
    async fn get_postings(&self, tokens: &[u32]) -> Result<Vec<InvertedIndexEntry>, StoreError>;

    async fn get_token_infos(&self, doc_ids: &[String]) -> Result<Vec<ChunkTokenInfo>, StoreError>;

    /// `(doc_id, length)` for every indexed chunk.
    async fn iter_token_lengths(&self) -> Result<Vec<(String, usize)>, StoreError>;

    /// Number of distinct tokens with a postings entry.
    async fn posting_count(&self) -> Result<usize, StoreError>;

    // =========================================================================
    // File Operations
    // =========================================================================

    async fn get_file(&self, file_path: &str) -> Result<Option<FileRecord>, StoreError>;

    async fn list_files(&self) -> Result<Vec<FileRecord>, StoreError>;

    // =========================================================================
    // Write / Utility Operations
    // =========================================================================

    /// Commits every op in `batch` atomically. On error nothing is applied.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Removes all data (schema metadata is kept).
    async fn clear(&self) -> Result<(), StoreError>;

    /// Schema version of the stored data.
    async fn schema_version(&self) -> Result<u32, StoreError>;
}

#[derive(Default)]
struct Tables {
    chunks: BTreeMap<String, ChunkMetadata>,
    embeddings: BTreeMap<String, Vec<f32>>,
    postings: BTreeMap<u32, InvertedIndexEntry>,
    token_infos: BTreeMap<String, ChunkTokenInfo>,
    files: BTreeMap<String, FileRecord>,
}

impl Tables {
    fn apply_op(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutChunk(chunk) => {
                self.chunks.insert(chunk.id.clone(), chunk);
            }
            WriteOp::DeleteChunk(id) => {
                self.chunks.remove(&id);
            }
            WriteOp::PutEmbedding { id, embedding } => {
                self.embeddings.insert(id, embedding);
            }
            WriteOp::DeleteEmbedding(id) => {
                self.embeddings.remove(&id);
            }
            WriteOp::PutPosting(entry) => {
                self.postings.insert(entry.token, entry);
            }
            WriteOp::DeletePosting(token) => {
                self.postings.remove(&token);
            }
            WriteOp::PutTokenInfo(info) => {
                self.token_infos.insert(info.doc_id.clone(), info);
            }
            WriteOp::DeleteTokenInfo(id) => {
                self.token_infos.remove(&id);
            }
            WriteOp::PutFile(record) => {
                self.files.insert(record.file_path.clone(), record);
            }
            WriteOp::DeleteFile(path) => {
                self.files.remove(&path);
            }
        }
    }
}

/// In-memory document store for tests and ephemeral indexes.
///
/// All tables sit behind one lock, so a batch is applied while holding the
/// write guard and readers never observe half of it.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent [`apply`](DocumentStore::apply) fail without
    /// touching data, for exercising error paths.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::DatabaseError(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::DatabaseError(format!("Lock poisoned: {}", e)))
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_chunk(&self, id: &str) -> Result<Option<ChunkMetadata>, StoreError> {
        Ok(self.read()?.chunks.get(id).cloned())
    }

    async fn get_chunks_batch(&self, ids: &[String]) -> Result<Vec<ChunkMetadata>, StoreError> {
        let tables = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.chunks.get(id).cloned())
            .collect())
    }

    async fn chunks_for_file(&self, file_path: &str) -> Result<Vec<ChunkMetadata>, StoreError> {
        let tables = self.read()?;
        let prefix = id_prefix(file_path);
        Ok(tables
            .chunks
            .range(prefix.clone()..)
            .take_while(|(id, _)| id.starts_with(&prefix))
            .filter(|(_, chunk)| chunk.file_path == file_path)
            .map(|(_, chunk)| chunk.clone())
            .collect())
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.chunks.len())
    }

    async fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>, StoreError> {
        Ok(self.read()?.embeddings.get(id).cloned())
    }

    async fn iter_embeddings(&self) -> Result<Vec<EmbeddingData>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .embeddings
            .iter()
            .map(|(id, embedding)| EmbeddingData {
                id: id.clone(),
                embedding: embedding.clone(),
            })
            .collect())
    }

    async fn get_postings(&self, tokens: &[u32]) -> Result<Vec<InvertedIndexEntry>, StoreError> {
        let tables = self.read()?;
        Ok(tokens
            .iter()
            .filter_map(|token| tables.postings.get(token).cloned())
            .collect())
    }

    async fn get_token_infos(&self, doc_ids: &[String]) -> Result<Vec<ChunkTokenInfo>, StoreError> {
        let tables = self.read()?;
        Ok(doc_ids
            .iter()
            .filter_map(|id| tables.token_infos.get(id).cloned())
            .collect())
    }

    async fn iter_token_lengths(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .token_infos
            .values()
            .map(|info| (info.doc_id.clone(), info.length))
            .collect())
    }

    async fn posting_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.postings.len())
    }

    async fn get_file(&self, file_path: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.read()?.files.get(file_path).cloned())
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self.read()?.files.values().cloned().collect())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError(
                "Failed to commit batch: writes disabled".to_string(),
            ));
        }
        let mut tables = self.write()?;
        for op in batch.into_ops() {
            tables.apply_op(op);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.write()? = Tables::default();
        Ok(())
    }

    async fn schema_version(&self) -> Result<u32, StoreError> {
        Ok(super::CURRENT_SCHEMA_VERSION)
    }
}
