//! Error types for lodestone-core.
//!
//! This module defines the error types shared across modules: provider
//! (tokenizer/embedder) failures and chunking failures. Storage, search,
//! configuration and manager errors live next to the code that raises them.

use thiserror::Error;

/// Errors raised by the token/embedding provider.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Failed to tokenize text
    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),
    /// Embedding inference failed
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    /// Tokenizer not available or initialization failed
    #[error("Tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),
    /// Provider is unreachable (remote backend down, model not loaded)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    /// Provider returned a different number of vectors than requested
    #[error("Expected {expected} embeddings, provider returned {actual}")]
    CountMismatch { expected: usize, actual: usize },
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can occur during text chunking.
///
/// Token budget violations are not represented here: a chunk that exceeds
/// `max_tokens` after splitting is a chunker bug and panics.
#[derive(Debug, Clone, Error)]
pub enum ChunkingError {
    /// Invalid chunking configuration
    #[error("Invalid chunking config: {0}")]
    InvalidConfig(String),
    /// Tokenizer error during chunk sizing
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
}

impl From<EmbeddingError> for ChunkingError {
    fn from(err: EmbeddingError) -> Self {
        ChunkingError::TokenizerError(err.to_string())
    }
}
