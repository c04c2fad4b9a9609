//! Token-aware text chunking.
//!
//! Documents are split into overlapping chunks that never exceed a token
//! budget, each tagged with the heading path it sits under and the byte
//! offset where it starts in the source.
//!
//! # Why line-based?
//!
//! Notes and documentation are written in lines and paragraphs. Packing
//! whole lines keeps list items, code lines and table rows intact; only a
//! line that cannot fit on its own is split, by sentence first and by
//! word boundary as a last resort.
//!
//! # Usage
//!
//! ```ignore
//! use lodestone_core::chunking::{chunk_text, ChunkerConfig};
//!
//! let chunks = chunk_text(&content, &ChunkerConfig::new(512, 64), &tokenizer)?;
//! for chunk in chunks {
//!     println!("{:?} @{}: {}", chunk.headings, chunk.start_offset, chunk.content);
//! }
//! ```

mod line_chunker;
mod split;
mod token_memo;
mod types;

use crate::embedding::TokenCounter;
use crate::error::ChunkingError;

pub use line_chunker::LineChunker;
pub use types::{Chunk, ChunkerConfig};

/// Trait for text chunking strategies.
///
/// The engine holds a strategy behind `Arc<dyn ChunkingStrategy>` so hosts
/// can swap in a different splitter without touching index code.
pub trait ChunkingStrategy: Send + Sync {
    /// Splits text into chunks, ordered by position in the source.
    ///
    /// Every returned chunk has `counter.count_tokens(&chunk.content) <=
    /// self.max_tokens()`.
    fn chunk(&self, text: &str, counter: &dyn TokenCounter) -> Result<Vec<Chunk>, ChunkingError>;

    /// Returns a human-readable name for this strategy.
    fn name(&self) -> &'static str;

    /// Returns the maximum tokens per chunk.
    fn max_tokens(&self) -> usize;
}

/// Chunks `text` with the default line strategy.
pub fn chunk_text(
    text: &str,
    config: &ChunkerConfig,
    counter: &dyn TokenCounter,
) -> Result<Vec<Chunk>, ChunkingError> {
    LineChunker::new(*config).chunk(text, counter)
}
