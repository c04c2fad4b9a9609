//! BM25 keyword search for exact term matching.
//!
//! An inverted index persisted in the [`DocumentStore`]: one postings entry
//! per provider token id, plus the token list of every indexed chunk so that
//! replacing or deleting a chunk can retract exactly what it contributed.
//!
//! # Algorithm
//!
//! BM25 scores documents based on:
//! - **Term Frequency (TF)**: How often query terms appear in the chunk
//! - **Inverse Document Frequency (IDF)**: Rarity of terms across the corpus
//! - **Document Length**: Normalized to avoid bias toward longer chunks
//!
//! ```text
//! idf   = ln((N - df + 0.5) / (df + 0.5) + 1)
//! score = idf * tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avgdl))
//! ```
//!
//! Title pseudo-chunks and content chunks share one index; N, df and avgdl
//! are corpus-wide and [`Bm25Index::search_field`] filters candidates after
//! scoring.
//!
//! # Usage
//!
//! ```ignore
//! use lodestone_core::search::keyword::{Bm25Index, KeywordDocument};
//!
//! let index = Bm25Index::new(store, provider);
//! index.index_batch(&[KeywordDocument::new("a.md#0", "rust programming language")]).await?;
//! let hits = index.search("rust", 10).await?;
//! ```

use super::types::{
    ChunkTokenInfo, Field, IndexMetadata, InvertedIndexEntry, ScoredId, SearchError,
};
use crate::config::{BM25_B, BM25_K1};
use crate::embedding::EmbeddingProvider;
use crate::storage::{DocumentStore, WriteBatch, WriteOp};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// Text to index under a chunk or title id.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDocument {
    pub doc_id: String,
    pub content: String,
}

impl KeywordDocument {
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            content: content.into(),
        }
    }
}

/// Inverse document frequency of a token found in `df` of `total_docs` chunks.
pub fn idf(total_docs: usize, df: usize) -> f32 {
    let n = total_docs as f32;
    let df = df as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// BM25 contribution of one query token to one chunk.
pub fn term_score(idf: f32, tf: u32, doc_len: usize, avg_doc_len: f32) -> f32 {
    let tf = tf as f32;
    let length_ratio = if avg_doc_len > 0.0 {
        doc_len as f32 / avg_doc_len
    } else {
        0.0
    };
    idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_ratio))
}

/// Cached corpus statistics, tagged with the generation they were built at.
struct MetadataCache {
    generation: u64,
    metadata: Arc<IndexMetadata>,
}

/// Store-backed BM25 index.
///
/// # Thread Safety
///
/// Reads are safe to run concurrently. Mutations must be serialized by the
/// caller (the engine holds its write lock across stage + commit +
/// [`invalidate`](Self::invalidate)).
pub struct Bm25Index {
    store: Arc<dyn DocumentStore>,
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<Option<MetadataCache>>,
    generation: AtomicU64,
}

impl Bm25Index {
    pub fn new(store: Arc<dyn DocumentStore>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            provider,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>, SearchError> {
        Ok(self.provider.tokenize(&text.to_lowercase()).await?)
    }

    /// Stages the removal of `removed` and the (re)indexing of `added` into
    /// `batch` without committing.
    ///
    /// Both sets are merged against the same postings snapshot so a batch
    /// never carries two conflicting writes for one token. After the batch
    /// is committed the caller must call [`invalidate`](Self::invalidate).
    #[instrument(skip_all, fields(removed = removed.len(), added = added.len()))]
    pub async fn stage_update(
        &self,
        removed: &[String],
        added: &[KeywordDocument],
        batch: &mut WriteBatch,
    ) -> Result<(), SearchError> {
        // Tokenize first so a provider failure stages nothing
        let mut new_infos = Vec::with_capacity(added.len());
        for doc in added {
            let tokens = self.tokenize(&doc.content).await?;
            new_infos.push(ChunkTokenInfo::new(doc.doc_id.clone(), tokens));
        }

        let added_ids: HashSet<&str> = added.iter().map(|d| d.doc_id.as_str()).collect();
        let mut touched_ids: Vec<String> = removed.to_vec();
        touched_ids.extend(added.iter().map(|d| d.doc_id.clone()));
        touched_ids.sort();
        touched_ids.dedup();
        let touched: HashSet<&str> = touched_ids.iter().map(String::as_str).collect();

        // Previous token lists tell us which postings the old versions are in
        let old_infos = self.store.get_token_infos(&touched_ids).await?;

        let mut new_tfs: Vec<(&str, HashMap<u32, u32>)> = Vec::with_capacity(new_infos.len());
        for info in &new_infos {
            let mut tf: HashMap<u32, u32> = HashMap::new();
            for &token in &info.tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            new_tfs.push((info.doc_id.as_str(), tf));
        }

        let mut affected: Vec<u32> = old_infos
            .iter()
            .flat_map(|info| info.tokens.iter().copied())
            .chain(new_tfs.iter().flat_map(|(_, tf)| tf.keys().copied()))
            .collect();
        affected.sort_unstable();
        affected.dedup();

        let mut entries: HashMap<u32, InvertedIndexEntry> = self
            .store
            .get_postings(&affected)
            .await?
            .into_iter()
            .map(|entry| (entry.token, entry))
            .collect();

        for &token in &affected {
            let entry = entries
                .entry(token)
                .or_insert_with(|| InvertedIndexEntry::new(token));
            entry.postings.retain(|p| !touched.contains(p.doc_id.as_str()));
            entry.document_frequency = entry.postings.len();
        }
        for (doc_id, tf) in &new_tfs {
            for (&token, &count) in tf {
                if let Some(entry) = entries.get_mut(&token) {
                    entry.upsert(doc_id, count);
                }
            }
        }

        let mut deleted_tokens = 0usize;
        for token in affected {
            match entries.remove(&token) {
                Some(entry) if !entry.is_empty() => batch.push(WriteOp::PutPosting(entry)),
                _ => {
                    deleted_tokens += 1;
                    batch.push(WriteOp::DeletePosting(token));
                }
            }
        }

        for id in removed {
            if !added_ids.contains(id.as_str()) {
                batch.push(WriteOp::DeleteTokenInfo(id.clone()));
            }
        }
        for info in new_infos {
            batch.push(WriteOp::PutTokenInfo(info));
        }

        debug!(
            "Staged BM25 update: {} removed, {} added, {} tokens dropped",
            removed.len(),
            added.len(),
            deleted_tokens
        );
        Ok(())
    }

    /// Indexes (or re-indexes) chunks and commits in one transaction.
    pub async fn index_batch(&self, docs: &[KeywordDocument]) -> Result<(), SearchError> {
        let mut batch = WriteBatch::new();
        self.stage_update(&[], docs, &mut batch).await?;
        self.store.apply(batch).await?;
        self.invalidate();
        Ok(())
    }

    /// Removes chunks and commits in one transaction. Unknown ids are ignored.
    pub async fn delete_documents(&self, doc_ids: &[String]) -> Result<(), SearchError> {
        let mut batch = WriteBatch::new();
        self.stage_update(doc_ids, &[], &mut batch).await?;
        self.store.apply(batch).await?;
        self.invalidate();
        Ok(())
    }

    /// Removes every posting and token list.
    pub async fn clear_all(&self) -> Result<(), SearchError> {
        let ids: Vec<String> = self
            .store
            .iter_token_lengths()
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        self.delete_documents(&ids).await
    }

    /// Drops cached statistics; call after every committed mutation.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    /// Corpus statistics, rebuilt from the store when the cache is cold.
    pub async fn metadata(&self) -> Result<Arc<IndexMetadata>, SearchError> {
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let cache = self
                .cache
                .read()
                .map_err(|e| SearchError::StorageError(format!("Lock poisoned: {}", e)))?;
            if let Some(cached) = cache.as_ref() {
                if cached.generation == generation {
                    return Ok(cached.metadata.clone());
                }
            }
        }

        let lengths = self.store.iter_token_lengths().await?;
        let metadata = Arc::new(IndexMetadata::from_lengths(lengths));

        // A mutation committed during the scan makes this snapshot stale
        let mut cache = self
            .cache
            .write()
            .map_err(|e| SearchError::StorageError(format!("Lock poisoned: {}", e)))?;
        if self.generation.load(Ordering::SeqCst) == generation {
            *cache = Some(MetadataCache {
                generation,
                metadata: metadata.clone(),
            });
        }
        Ok(metadata)
    }

    /// Searches all indexed chunks and titles.
    ///
    /// Returns up to `top_k` `(doc_id, score)` pairs sorted by score
    /// descending; ties keep the order in which documents were discovered.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredId>, SearchError> {
        self.score(query, top_k, None).await
    }

    /// Like [`search`](Self::search) but only returns ids of `field`.
    pub async fn search_field(
        &self,
        query: &str,
        top_k: usize,
        field: Field,
    ) -> Result<Vec<ScoredId>, SearchError> {
        self.score(query, top_k, Some(field)).await
    }

    #[instrument(skip_all, fields(query_len = query.len(), top_k = top_k))]
    async fn score(
        &self,
        query: &str,
        top_k: usize,
        field: Option<Field>,
    ) -> Result<Vec<ScoredId>, SearchError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_tokens = self.tokenize(query).await?;
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let metadata = self.metadata().await?;
        if metadata.total_documents == 0 {
            return Ok(Vec::new());
        }

        let mut unique: Vec<u32> = query_tokens.clone();
        unique.sort_unstable();
        unique.dedup();
        let entries: HashMap<u32, InvertedIndexEntry> = self
            .store
            .get_postings(&unique)
            .await?
            .into_iter()
            .map(|entry| (entry.token, entry))
            .collect();

        let mut scores: Vec<ScoredId> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        // Each query occurrence counts, so "rust rust" weighs rust twice
        for token in &query_tokens {
            let Some(entry) = entries.get(token) else {
                continue;
            };
            let token_idf = idf(metadata.total_documents, entry.document_frequency);
            for posting in &entry.postings {
                if let Some(field) = field {
                    if !field.matches(&posting.doc_id) {
                        continue;
                    }
                }
                let doc_len = metadata
                    .doc_lengths
                    .get(&posting.doc_id)
                    .copied()
                    .unwrap_or(0);
                let contribution = term_score(
                    token_idf,
                    posting.term_frequency,
                    doc_len,
                    metadata.average_doc_length,
                );
                match positions.get(&posting.doc_id) {
                    Some(&pos) => scores[pos].score += contribution,
                    None => {
                        positions.insert(posting.doc_id.clone(), scores.len());
                        scores.push(ScoredId::new(posting.doc_id.clone(), contribution));
                    }
                }
            }
        }

        // Stable sort keeps discovery order among equal scores
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scores.truncate(top_k);
        Ok(scores)
    }
}
