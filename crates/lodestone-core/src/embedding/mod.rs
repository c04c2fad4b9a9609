//! Token and embedding provider abstractions.
//!
//! The engine never generates vectors itself. Everything model-related comes
//! through the traits defined here, injected at construction time:
//!
//! - [`TokenCounter`] - synchronous token counting, all the chunker needs
//! - [`EmbeddingProvider`] - token ids for BM25 plus query/document vectors
//! - [`Reranker`] - optional cross-encoder style scoring of candidate texts
//!
//! [`TokenizerHandle`] adapts a HuggingFace `tokenizer.json` to
//! [`TokenCounter`] and supplies token ids, so a provider backed by a local
//! model only has to add the embedding call.
//!
//! ## Example
//!
//! ```ignore
//! use lodestone_core::embedding::{EmbedKind, EmbeddingProvider, TokenizerHandle};
//!
//! let tokenizer = TokenizerHandle::from_bytes(std::fs::read("tokenizer.json")?)?;
//! let count = tokenizer.count_tokens("Hello, world!")?;
//!
//! let vectors = provider.embed(&["query text".into()], EmbedKind::Query).await?;
//! ```

mod traits;

pub mod tokenizer;

pub use tokenizer::TokenizerHandle;
pub use traits::{EmbedKind, EmbeddingProvider, Reranker, TokenCounter};
