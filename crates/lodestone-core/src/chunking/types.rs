//! Types for text chunking.

use crate::config::{CHUNK_OVERLAP_TOKENS, MAX_CHUNK_TOKENS};
use crate::error::ChunkingError;
use serde::{Deserialize, Serialize};

/// A token-bounded slice of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Trimmed chunk text
    pub content: String,
    /// Heading path (levels 1-3) in effect at the chunk's first line
    pub headings: Vec<String>,
    /// Byte offset of the first non-whitespace character in the source
    pub start_offset: usize,
}

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Hard upper bound on tokens per chunk
    pub max_tokens: usize,
    /// Budget for context repeated from the end of the previous chunk
    pub overlap_tokens: usize,
    /// Trailing chunk is dropped unless the lines it adds after the overlap
    /// hold more tokens than this. Overlap repeated from the previous chunk
    /// is not counted; 0 keeps any non-empty tail.
    pub min_trailing_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: MAX_CHUNK_TOKENS,
            overlap_tokens: CHUNK_OVERLAP_TOKENS,
            min_trailing_tokens: 0,
        }
    }
}

impl ChunkerConfig {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            min_trailing_tokens: 0,
        }
    }

    pub fn with_min_trailing_tokens(mut self, min_trailing_tokens: usize) -> Self {
        self.min_trailing_tokens = min_trailing_tokens;
        self
    }

    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_tokens == 0 {
            return Err(ChunkingError::InvalidConfig(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}
