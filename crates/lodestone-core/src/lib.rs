//! # Lodestone Core
//!
//! Local hybrid retrieval over a collection of text documents.
//!
//! Files are split into token-bounded chunks, indexed twice (BM25 over the
//! provider's token ids and exact cosine similarity over its embeddings), and
//! searched at file level: chunk hits are aggregated per file, the two
//! signals are merged with weighted Reciprocal Rank Fusion, and titles and
//! content are blended by weight.
//!
//! The crate has no model runtime of its own. Tokenization, embedding and
//! optional reranking come from implementations of the traits in
//! [`embedding`]; persistence goes through the [`storage::DocumentStore`]
//! trait (an embedded `redb` database by default).
//!
//! ## Modules
//!
//! - [`search`] - Hybrid engine (BM25 + vector + RRF fusion, reranking)
//! - [`storage`] - Document store trait, in-memory and redb backends
//! - [`chunking`] - Line/sentence/token chunker with heading context
//! - [`embedding`] - Provider and reranker traits, tokenizer adapter
//! - [`manager`] - Search queue with per-caller supersession
//! - [`processing`] - Bulk sync of file operations with retry accounting
//! - [`evaluation`] - IR metrics and TREC run/qrels formats
//! - [`config`] - Defaults, engine configuration, live option handle
//! - [`error`] - Provider and chunking error types

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod manager;
pub mod processing;
pub mod search;
pub mod storage;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigHandle, EngineConfig};
pub use manager::{SearchManager, SearchOutcome};
pub use search::{HybridSearchEngine, SearchOptions, SearchResult, SourceDocument};
