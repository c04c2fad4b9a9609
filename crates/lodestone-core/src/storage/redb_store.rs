//! Redb-backed document store.
//!
//! Uses [redb](https://github.com/cberner/redb) - a pure Rust, ACID-compliant,
//! embedded B-tree database. Provides O(log n) lookups for chunks, embeddings,
//! postings and file records.
//!
//! # Tables
//!
//! - `chunks`: chunk id (string) -> ChunkMetadata (JSON)
//! - `embeddings`: chunk id (string) -> `Vec<f32>` (raw bytes, little-endian)
//! - `postings`: token id (u32) -> InvertedIndexEntry (JSON)
//! - `token_infos`: chunk id (string) -> ChunkTokenInfo (JSON)
//! - `files`: file path (string) -> FileRecord (JSON)
//! - `metadata`: key (string) -> u32, holds the schema version

use super::{DocumentStore, StoreError, WriteBatch, WriteOp, CURRENT_SCHEMA_VERSION};
use crate::search::types::{
    id_prefix, ChunkMetadata, ChunkTokenInfo, EmbeddingData, FileRecord, InvertedIndexEntry,
};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

// Table definitions
const CHUNKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const EMBEDDINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("embeddings");
const POSTINGS_TABLE: TableDefinition<u32, &[u8]> = TableDefinition::new("postings");
const TOKEN_INFOS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("token_infos");
const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");
const METADATA_TABLE: TableDefinition<&str, u32> = TableDefinition::new("metadata");

// Metadata keys
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Upgrades the stored data from version `n` to `n + 1`.
type MigrationStep = fn(&WriteTransaction) -> Result<(), StoreError>;

/// `(from_version, step)` pairs, applied in order until the current version.
const MIGRATIONS: &[(u32, MigrationStep)] = &[];

fn db_err(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::DatabaseError(format!("Failed to {}: {}", context, e))
}

/// Redb-backed document store.
///
/// Every [`apply`](DocumentStore::apply) is one write transaction; if any op
/// fails the transaction is dropped and redb rolls it back.
///
/// # Example
///
/// ```ignore
/// use lodestone_core::storage::RedbDocumentStore;
///
/// let store = RedbDocumentStore::open("./data/index.redb")?;
/// let files = store.list_files().await?;
/// ```
pub struct RedbDocumentStore {
    db: Arc<Database>,
}

impl RedbDocumentStore {
    /// Opens or creates a redb database at the given path.
    ///
    /// Creates all tables if they don't exist, stamps a fresh database with
    /// [`CURRENT_SCHEMA_VERSION`], upgrades older data and refuses newer data.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| db_err("open database", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| db_err("begin write transaction", e))?;

        // Open (and create if needed) each table
        write_txn
            .open_table(CHUNKS_TABLE)
            .map_err(|e| db_err("create chunks table", e))?;
        write_txn
            .open_table(EMBEDDINGS_TABLE)
            .map_err(|e| db_err("create embeddings table", e))?;
        write_txn
            .open_table(POSTINGS_TABLE)
            .map_err(|e| db_err("create postings table", e))?;
        write_txn
            .open_table(TOKEN_INFOS_TABLE)
            .map_err(|e| db_err("create token_infos table", e))?;
        write_txn
            .open_table(FILES_TABLE)
            .map_err(|e| db_err("create files table", e))?;

        Self::check_schema(&write_txn)?;

        write_txn
            .commit()
            .map_err(|e| db_err("commit table creation", e))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Reads the stored schema version and migrates it to the current one.
    fn check_schema(write_txn: &WriteTransaction) -> Result<(), StoreError> {
        let stored = {
            let table = write_txn
                .open_table(METADATA_TABLE)
                .map_err(|e| db_err("create metadata table", e))?;
            let version = table
                .get(SCHEMA_VERSION_KEY)
                .map_err(|e| db_err("read schema version", e))?
                .map(|guard| guard.value());
            version
        };

        let found = match stored {
            None => {
                Self::write_schema_version(write_txn, CURRENT_SCHEMA_VERSION)?;
                return Ok(());
            }
            Some(v) if v == CURRENT_SCHEMA_VERSION => return Ok(()),
            Some(v) if v > CURRENT_SCHEMA_VERSION => {
                return Err(StoreError::SchemaMismatch {
                    found: v,
                    supported: CURRENT_SCHEMA_VERSION,
                })
            }
            Some(v) => v,
        };

        let mut version = found;
        while version < CURRENT_SCHEMA_VERSION {
            let step = MIGRATIONS
                .iter()
                .find(|(from, _)| *from == version)
                .map(|(_, step)| step)
                .ok_or(StoreError::SchemaMismatch {
                    found,
                    supported: CURRENT_SCHEMA_VERSION,
                })?;
            step(write_txn)?;
            version += 1;
        }
        Self::write_schema_version(write_txn, version)?;
        info!("Migrated index schema from v{} to v{}", found, version);
        Ok(())
    }

    fn write_schema_version(write_txn: &WriteTransaction, version: u32) -> Result<(), StoreError> {
        let mut table = write_txn
            .open_table(METADATA_TABLE)
            .map_err(|e| db_err("open metadata table", e))?;
        table
            .insert(SCHEMA_VERSION_KEY, version)
            .map_err(|e| db_err("write schema version", e))?;
        Ok(())
    }

    fn serialize<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(value).map_err(|e| {
            StoreError::SerializationError(format!("Failed to serialize {}: {}", what, e))
        })
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            StoreError::SerializationError(format!("Failed to deserialize {}: {}", what, e))
        })
    }

    /// Serializes an embedding to raw bytes.
    ///
    /// Format: Little-endian f32 values packed sequentially (4 bytes per value).
    /// Endianness MUST match `deserialize_embedding()`.
    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(embedding.len() * 4);
        for &val in embedding {
            bytes.extend_from_slice(&val.to_le_bytes());
        }
        bytes
    }

    /// Deserializes an embedding from raw bytes (little-endian f32 values).
    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Looks up JSON values for string keys in one table, skipping missing keys.
    fn get_json_batch<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        keys: &[String],
        what: &str,
    ) -> Result<Vec<T>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(|e| db_err(&format!("open {} table", what), e))?;

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let guard = table
                .get(key.as_str())
                .map_err(|e| db_err(&format!("get {}", what), e))?;
            if let Some(guard) = guard {
                values.push(Self::deserialize(guard.value(), what)?);
            }
        }
        Ok(values)
    }

    fn table_len<K: redb::Key + 'static, V: redb::Value + 'static>(
        &self,
        table_def: TableDefinition<K, V>,
        what: &str,
    ) -> Result<usize, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(|e| db_err(&format!("open {} table", what), e))?;
        let count = table
            .len()
            .map_err(|e| db_err(&format!("get {} count", what), e))?;
        Ok(count as usize)
    }

    fn write_ops(write_txn: &WriteTransaction, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut chunks = write_txn
            .open_table(CHUNKS_TABLE)
            .map_err(|e| db_err("open chunks table", e))?;
        let mut embeddings = write_txn
            .open_table(EMBEDDINGS_TABLE)
            .map_err(|e| db_err("open embeddings table", e))?;
        let mut postings = write_txn
            .open_table(POSTINGS_TABLE)
            .map_err(|e| db_err("open postings table", e))?;
        let mut token_infos = write_txn
            .open_table(TOKEN_INFOS_TABLE)
            .map_err(|e| db_err("open token_infos table", e))?;
        let mut files = write_txn
            .open_table(FILES_TABLE)
            .map_err(|e| db_err("open files table", e))?;

        for op in ops {
            match op {
                WriteOp::PutChunk(chunk) => {
                    let bytes = Self::serialize(&chunk, "chunk")?;
                    chunks
                        .insert(chunk.id.as_str(), bytes.as_slice())
                        .map_err(|e| db_err("insert chunk", e))?;
                }
                WriteOp::DeleteChunk(id) => {
                    // Removing a missing key returns Ok(None), which is fine
                    chunks
                        .remove(id.as_str())
                        .map_err(|e| db_err("delete chunk", e))?;
                }
                WriteOp::PutEmbedding { id, embedding } => {
                    let bytes = Self::serialize_embedding(&embedding);
                    embeddings
                        .insert(id.as_str(), bytes.as_slice())
                        .map_err(|e| db_err("insert embedding", e))?;
                }
                WriteOp::DeleteEmbedding(id) => {
                    embeddings
                        .remove(id.as_str())
                        .map_err(|e| db_err("delete embedding", e))?;
                }
                WriteOp::PutPosting(entry) => {
                    let bytes = Self::serialize(&entry, "postings")?;
                    postings
                        .insert(entry.token, bytes.as_slice())
                        .map_err(|e| db_err("insert postings", e))?;
                }
                WriteOp::DeletePosting(token) => {
                    postings
                        .remove(token)
                        .map_err(|e| db_err("delete postings", e))?;
                }
                WriteOp::PutTokenInfo(info) => {
                    let bytes = Self::serialize(&info, "token info")?;
                    token_infos
                        .insert(info.doc_id.as_str(), bytes.as_slice())
                        .map_err(|e| db_err("insert token info", e))?;
                }
                WriteOp::DeleteTokenInfo(id) => {
                    token_infos
                        .remove(id.as_str())
                        .map_err(|e| db_err("delete token info", e))?;
                }
                WriteOp::PutFile(record) => {
                    let bytes = Self::serialize(&record, "file record")?;
                    files
                        .insert(record.file_path.as_str(), bytes.as_slice())
                        .map_err(|e| db_err("insert file record", e))?;
                }
                WriteOp::DeleteFile(path) => {
                    files
                        .remove(path.as_str())
                        .map_err(|e| db_err("delete file record", e))?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for RedbDocumentStore {
    // =========================================================================
    // Chunk Operations
    // =========================================================================

    async fn get_chunk(&self, id: &str) -> Result<Option<ChunkMetadata>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(CHUNKS_TABLE)
            .map_err(|e| db_err("open chunks table", e))?;

        match table.get(id) {
            Ok(Some(guard)) => Ok(Some(Self::deserialize(guard.value(), "chunk")?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err("get chunk", e)),
        }
    }

    async fn get_chunks_batch(&self, ids: &[String]) -> Result<Vec<ChunkMetadata>, StoreError> {
        self.get_json_batch(CHUNKS_TABLE, ids, "chunk")
    }

    async fn chunks_for_file(&self, file_path: &str) -> Result<Vec<ChunkMetadata>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(CHUNKS_TABLE)
            .map_err(|e| db_err("open chunks table", e))?;

        let prefix = id_prefix(file_path);
        let range = table
            .range::<&str>(prefix.as_str()..)
            .map_err(|e| db_err("scan chunks", e))?;

        let mut chunks = Vec::new();
        for entry in range {
            let (key, value) = entry.map_err(|e| db_err("read chunk entry", e))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let chunk: ChunkMetadata = Self::deserialize(value.value(), "chunk")?;
            // "a.md#x#0" shares the "a.md#" prefix but belongs to "a.md#x"
            if chunk.file_path == file_path {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        self.table_len(CHUNKS_TABLE, "chunks")
    }

    // =========================================================================
    // Embedding Operations
    // =========================================================================

    async fn get_embedding(&self, id: &str) -> Result<Option<Vec<f32>>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(EMBEDDINGS_TABLE)
            .map_err(|e| db_err("open embeddings table", e))?;

        match table.get(id) {
            Ok(Some(guard)) => Ok(Some(Self::deserialize_embedding(guard.value()))),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err("get embedding", e)),
        }
    }

    async fn iter_embeddings(&self) -> Result<Vec<EmbeddingData>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(EMBEDDINGS_TABLE)
            .map_err(|e| db_err("open embeddings table", e))?;

        let mut embeddings = Vec::new();
        let iter = table.iter().map_err(|e| db_err("iterate embeddings", e))?;
        for result in iter {
            let (key, value) = result.map_err(|e| db_err("read embedding entry", e))?;
            embeddings.push(EmbeddingData {
                id: key.value().to_string(),
                embedding: Self::deserialize_embedding(value.value()),
            });
        }
        Ok(embeddings)
    }

    // =========================================================================
    // Inverted Index Operations
    // =========================================================================

    async fn get_postings(&self, tokens: &[u32]) -> Result<Vec<InvertedIndexEntry>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(POSTINGS_TABLE)
            .map_err(|e| db_err("open postings table", e))?;

        let mut entries = Vec::with_capacity(tokens.len());
        for &token in tokens {
            if let Some(guard) = table.get(token).map_err(|e| db_err("get postings", e))? {
                entries.push(Self::deserialize(guard.value(), "postings")?);
            }
        }
        Ok(entries)
    }

    async fn get_token_infos(&self, doc_ids: &[String]) -> Result<Vec<ChunkTokenInfo>, StoreError> {
        self.get_json_batch(TOKEN_INFOS_TABLE, doc_ids, "token info")
    }

    async fn iter_token_lengths(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(TOKEN_INFOS_TABLE)
            .map_err(|e| db_err("open token_infos table", e))?;

        let mut lengths = Vec::new();
        let iter = table.iter().map_err(|e| db_err("iterate token infos", e))?;
        for result in iter {
            let (_, value) = result.map_err(|e| db_err("read token info entry", e))?;
            let info: ChunkTokenInfo = Self::deserialize(value.value(), "token info")?;
            lengths.push((info.doc_id, info.length));
        }
        Ok(lengths)
    }

    async fn posting_count(&self) -> Result<usize, StoreError> {
        self.table_len(POSTINGS_TABLE, "postings")
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    async fn get_file(&self, file_path: &str) -> Result<Option<FileRecord>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(FILES_TABLE)
            .map_err(|e| db_err("open files table", e))?;

        match table.get(file_path) {
            Ok(Some(guard)) => Ok(Some(Self::deserialize(guard.value(), "file record")?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err("get file record", e)),
        }
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(FILES_TABLE)
            .map_err(|e| db_err("open files table", e))?;

        let mut files = Vec::new();
        let iter = table.iter().map_err(|e| db_err("iterate files", e))?;
        for result in iter {
            let (_, value) = result.map_err(|e| db_err("read file entry", e))?;
            files.push(Self::deserialize(value.value(), "file record")?);
        }
        Ok(files)
    }

    // =========================================================================
    // Write / Utility Operations
    // =========================================================================

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| db_err("begin write transaction", e))?;

        // On error the transaction is dropped uncommitted
        Self::write_ops(&write_txn, batch.into_ops())?;

        write_txn.commit().map_err(|e| db_err("commit batch", e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| db_err("begin write transaction", e))?;

        // Helper to clear a table with string keys
        fn clear_str_table(
            write_txn: &WriteTransaction,
            table_def: TableDefinition<&str, &[u8]>,
            table_name: &str,
        ) -> Result<usize, StoreError> {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| db_err(&format!("open {} table", table_name), e))?;
            let keys: Vec<String> = table
                .iter()
                .map_err(|e| db_err(&format!("iterate {}", table_name), e))?
                .filter_map(|r| r.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            for key in &keys {
                table
                    .remove(key.as_str())
                    .map_err(|e| db_err(&format!("remove from {}", table_name), e))?;
            }
            Ok(keys.len())
        }

        let chunks = clear_str_table(&write_txn, CHUNKS_TABLE, "chunks")?;
        clear_str_table(&write_txn, EMBEDDINGS_TABLE, "embeddings")?;
        clear_str_table(&write_txn, TOKEN_INFOS_TABLE, "token_infos")?;
        clear_str_table(&write_txn, FILES_TABLE, "files")?;
        {
            let mut table = write_txn
                .open_table(POSTINGS_TABLE)
                .map_err(|e| db_err("open postings table", e))?;
            let tokens: Vec<u32> = table
                .iter()
                .map_err(|e| db_err("iterate postings", e))?
                .filter_map(|r| r.ok().map(|(k, _)| k.value()))
                .collect();
            for token in tokens {
                table
                    .remove(token)
                    .map_err(|e| db_err("remove from postings", e))?;
            }
        }

        write_txn.commit().map_err(|e| db_err("commit clear", e))?;
        info!("Cleared index store ({} chunks removed)", chunks);
        Ok(())
    }

    async fn schema_version(&self) -> Result<u32, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| db_err("begin read transaction", e))?;
        let table = read_txn
            .open_table(METADATA_TABLE)
            .map_err(|e| db_err("open metadata table", e))?;
        let version = table
            .get(SCHEMA_VERSION_KEY)
            .map_err(|e| db_err("read schema version", e))?
            .map(|guard| guard.value())
            .ok_or(StoreError::NotInitialized)?;
        Ok(version)
    }
}
