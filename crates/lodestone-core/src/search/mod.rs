//! Hybrid search over titles and content chunks.
//!
//! This module implements a hybrid retrieval system that combines:
//! - **Vector search** (exact cosine similarity over every stored embedding)
//! - **Keyword search** (BM25 over provider token ids)
//! - **Weighted Reciprocal Rank Fusion** to merge the two rankings
//!
//! # Architecture
//!
//! - `types`: ids, persisted records, options, results and [`SearchError`]
//! - `engine`: [`HybridSearchEngine`], indexing and the query path
//! - `keyword`: store-backed BM25 index with incremental updates
//! - `vector`: flat in-memory vector index, split by field
//! - `aggregation`: chunk-to-file score aggregation (five methods)
//! - `fusion`: weighted RRF and title/content combination
//! - `rerank`: optional cross-encoder pass over merged candidates
//!
//! # Algorithm Details
//!
//! Each query runs once per field (title, content). Both signals fetch
//! `top_k * retrieval_multiplier` chunk candidates, which are grouped by file
//! and aggregated into file scores:
//!
//! ```text
//! field(f) = w_emb / (k + rank_vec(f)) + w_bm25 / (k + rank_bm25(f))
//!            normalized by (w_emb + w_bm25) / (k + 1)
//! final(f) = (w_title * title(f) + w_content * content(f)) / (w_title + w_content)
//! ```
//!
//! With only one signal weighted, its aggregated score passes through
//! unchanged.
//!
//! **BM25**: `k1 = 1.2`, `b = 0.75`, `idf = ln((N - df + 0.5) / (df + 0.5) + 1)`.
//! Document count and average length are shared by both fields.
//!
//! # Usage
//!
//! ```ignore
//! use lodestone_core::search::{HybridSearchEngine, SearchOptions, SourceDocument};
//!
//! engine.index_file(&SourceDocument::new("notes/cars.md", text, mtime)).await?;
//! for result in engine.search("automobile", &SearchOptions::default()).await? {
//!     println!("{:.3} {}", result.score, result.file_path);
//! }
//! ```

pub mod types;

pub mod aggregation;
mod engine;
pub mod fusion;
pub mod keyword;
pub mod rerank;
pub mod vector;

pub use aggregation::{AggregationConfig, AggregationMethod};
pub use engine::HybridSearchEngine;
pub use fusion::SignalMode;
pub use types::{
    validate_dimension, ChunkMetadata, Field, FileRecord, FusionWeights, IndexStats, ScoredId,
    SearchError, SearchOptions, SearchResult, SourceDocument, TopChunk,
};
