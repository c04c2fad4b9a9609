//! Test utilities for lodestone-core.
//!
//! Deterministic stand-ins for the model-backed pieces (token counting,
//! embedding, reranking) so unit tests run without model files.
//! Only compiled when running tests.

use crate::embedding::{EmbedKind, EmbeddingProvider, Reranker, TokenCounter};
use crate::error::EmbeddingError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Counts whitespace-separated words and records how often it was asked.
#[derive(Debug, Default)]
pub struct WordCounter {
    pub calls: AtomicUsize,
}

impl TokenCounter for WordCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.split_whitespace().count())
    }
}

/// One token per non-whitespace char.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharCounter;

impl TokenCounter for CharCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        Ok(text.chars().filter(|c| !c.is_whitespace()).count())
    }
}

/// One token per word plus one per line break, like BPE tokenizers that
/// encode `\n` as its own token.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineBreakCounter;

impl TokenCounter for LineBreakCounter {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        Ok(text.split_whitespace().count() + text.matches('\n').count())
    }
}

/// Installs a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Words that embed onto the same axis, standing in for semantic similarity.
const CONCEPTS: &[&[&str]] = &[
    &[
        "automobile", "automobiles", "car", "cars", "truck", "trucks", "vehicle", "vehicles",
        "transport", "road", "engine",
    ],
    &[
        "etymology", "language", "word", "words", "greek", "latin", "roots", "grammar",
    ],
    &[
        "baking", "bread", "flour", "oven", "recipe", "recipes", "cooking", "dough",
    ],
    &["weather", "rain", "snow", "storm", "forecast", "sunny"],
];

/// FNV-1a, stable across runs and platforms.
pub fn stable_hash(word: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in word.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Lower-cased alphanumeric runs.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Deterministic embedding provider.
///
/// - Tokens are lower-cased words with ids from a stable hash.
/// - Embeddings are normalized bags of words: words in the same concept group
///   share an axis, any other word lands on a hashed axis.
/// - Embedding can be made to fail for texts containing a marker, or to
///   sleep before answering.
pub struct MockProvider {
    dimension: usize,
    delay: Option<Duration>,
    fail_marker: Mutex<Option<String>>,
    fail_all: AtomicBool,
    pub embed_calls: AtomicUsize,
    pub embedded_texts: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > CONCEPTS.len(), "dimension too small for concepts");
        Self {
            dimension,
            delay: None,
            fail_marker: Mutex::new(None),
            fail_all: AtomicBool::new(false),
            embed_calls: AtomicUsize::new(0),
            embedded_texts: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails any embed call whose input contains `marker`.
    pub fn fail_on(&self, marker: &str) {
        *self.fail_marker.lock().unwrap() = Some(marker.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn token_id(word: &str) -> u32 {
        stable_hash(&word.to_lowercase())
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in words(text) {
            let axis = CONCEPTS
                .iter()
                .position(|group| group.contains(&word.as_str()))
                .unwrap_or_else(|| {
                    let free = self.dimension - CONCEPTS.len();
                    CONCEPTS.len() + stable_hash(&word) as usize % free
                });
            vector[axis] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl TokenCounter for MockProvider {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        Ok(words(text).len())
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<u32>, EmbeddingError> {
        Ok(words(text).iter().map(|w| stable_hash(w)).collect())
    }

    async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(EmbeddingError::InferenceFailed("provider offline".to_string()));
        }
        let marker = self.fail_marker.lock().unwrap().clone();
        if let Some(marker) = marker {
            if texts.iter().any(|t| t.contains(&marker)) {
                return Err(EmbeddingError::InferenceFailed(format!(
                    "refusing text containing {}",
                    marker
                )));
            }
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scores each document by the fraction of distinct query words it contains.
#[derive(Debug, Default)]
pub struct MockReranker {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Reranker for MockReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query_words: HashSet<String> = words(query).into_iter().collect();
        if query_words.is_empty() {
            return Ok(vec![0.0; documents.len()]);
        }
        Ok(documents
            .iter()
            .map(|doc| {
                let doc_words: HashSet<String> = words(doc).into_iter().collect();
                let hits = query_words.intersection(&doc_words).count();
                hits as f32 / query_words.len() as f32
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_concept_words_share_an_axis() {
        let provider = MockProvider::default();
        let query = provider.embed_one("automobile");
        let related = provider.embed_one("cars and trucks on the road");
        let unrelated = provider.embed_one("baking bread with flour");
        assert!(cosine(&query, &related) > 0.5);
        assert_eq!(cosine(&query, &unrelated), 0.0);
    }

    #[tokio::test]
    async fn test_tokenize_is_case_insensitive() {
        let provider = MockProvider::default();
        let a = provider.tokenize("Hello World").await.unwrap();
        let b = provider.tokenize("hello, world!").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.count_tokens("Hello World").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fail_marker() {
        let provider = MockProvider::default();
        provider.fail_on("POISON");
        assert!(provider
            .embed(&["fine".to_string()], EmbedKind::Document)
            .await
            .is_ok());
        assert!(provider
            .embed(&["POISON pill".to_string()], EmbedKind::Document)
            .await
            .is_err());
    }
}
