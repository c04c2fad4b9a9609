//! Traits for provider operations.
//!
//! These traits are the seams between the engine and the model runtime. They
//! let tests run against deterministic fakes and let hosts plug in local or
//! remote models without touching index code.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether text is embedded as a query or as indexed content.
///
/// Asymmetric models prepend different instructions for the two kinds, so
/// the engine always says which one it wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedKind {
    Query,
    Document,
}

/// Counts tokens the way the embedding model will see them.
///
/// Counting is synchronous: the chunker calls it once per distinct line and
/// sentence, and a round trip per call would dominate indexing time.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`, excluding special tokens.
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError>;
}

/// Token and embedding provider.
///
/// Must be deterministic for a fixed model version. Token ids double as BM25
/// term identities, so two calls with the same text must return the same ids.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the search manager drives the
/// engine from a spawned tokio task.
///
/// # Examples
///
/// ```ignore
/// let provider: Arc<dyn EmbeddingProvider> = Arc::new(MyProvider::load()?);
///
/// let ids = provider.tokenize("rust ownership").await?;
/// let vectors = provider
///     .embed(&["rust ownership".to_string()], EmbedKind::Query)
///     .await?;
/// assert_eq!(vectors[0].len(), provider.dimension());
/// ```
#[async_trait]
pub trait EmbeddingProvider: TokenCounter {
    /// Embedding vector length.
    fn dimension(&self) -> usize;

    /// Token ids of `text`, excluding special tokens.
    ///
    /// The engine lower-cases text before calling this.
    async fn tokenize(&self, text: &str) -> Result<Vec<u32>, EmbeddingError>;

    /// Embeds `texts`, returning one vector per input in input order.
    async fn embed(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Scores candidate passages against a query.
///
/// Implementations return one relevance score per document, in input order.
/// Scores only need to be comparable within one call; the engine min-max
/// normalizes the aggregated file scores.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EmbeddingError>;
}
