//! Per-call token count cache.

use crate::embedding::TokenCounter;
use crate::error::ChunkingError;
use std::collections::HashMap;

/// Memoizes token counts for slices of one source text.
///
/// Created at the start of a chunking call and dropped at its end, so counts
/// never outlive the provider state they were computed with. Keys borrow
/// from the source text being chunked.
pub(crate) struct TokenMemo<'a> {
    counter: &'a dyn TokenCounter,
    cache: HashMap<&'a str, usize>,
}

impl<'a> TokenMemo<'a> {
    pub(crate) fn new(counter: &'a dyn TokenCounter) -> Self {
        Self {
            counter,
            cache: HashMap::new(),
        }
    }

    /// Token count of `text`, computed at most once per distinct text.
    pub(crate) fn count(&mut self, text: &'a str) -> Result<usize, ChunkingError> {
        if let Some(&count) = self.cache.get(text) {
            return Ok(count);
        }
        let count = if text.trim().is_empty() {
            0
        } else {
            self.counter.count_tokens(text)?
        };
        self.cache.insert(text, count);
        Ok(count)
    }

    /// Counts text that does not borrow from the source (joined chunk content).
    pub(crate) fn count_owned(&self, text: &str) -> Result<usize, ChunkingError> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        Ok(self.counter.count_tokens(text)?)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.len()
    }
}
