//! HuggingFace tokenizer adapter.
//!
//! This module provides the `TokenizerHandle` type, which wraps a
//! `tokenizers::Tokenizer` loaded from `tokenizer.json` and exposes the two
//! things the engine needs from it: token ids and token counts.

use super::traits::TokenCounter;
use crate::error::EmbeddingError;
use std::path::Path;
use tokenizers::tokenizer::Tokenizer;

/// Handle for a loaded tokenizer.
///
/// No truncation is configured: the chunker relies on exact counts to keep
/// chunks within budget, and a truncating tokenizer would under-report long
/// lines.
///
/// # Examples
///
/// ```ignore
/// let tokenizer_bytes = std::fs::read("tokenizer.json")?;
/// let handle = TokenizerHandle::from_bytes(tokenizer_bytes)?;
///
/// let tokens = handle.tokenize("Hello, world!")?;
/// assert_eq!(handle.count_tokens("Hello, world!")?, tokens.len());
/// ```
#[derive(Clone)]
pub struct TokenizerHandle {
    tokenizer: Tokenizer,
}

impl TokenizerHandle {
    /// Creates a tokenizer from serialized `tokenizer.json` bytes.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingError::TokenizerUnavailable` if the bytes are not a
    /// valid tokenizer definition.
    pub fn from_bytes(tokenizer_bytes: impl AsRef<[u8]>) -> Result<Self, EmbeddingError> {
        let tokenizer = Tokenizer::from_bytes(tokenizer_bytes).map_err(|e| {
            EmbeddingError::TokenizerUnavailable(format!("Failed to deserialize tokenizer: {}", e))
        })?;
        Ok(Self { tokenizer })
    }

    /// Reads and loads a `tokenizer.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EmbeddingError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            EmbeddingError::TokenizerUnavailable(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_bytes(bytes)
    }

    /// Tokenizes text into token ids, without special tokens.
    ///
    /// # Errors
    ///
    /// Returns `EmbeddingError::TokenizationFailed` if encoding fails.
    pub fn tokenize(&self, text: &str) -> Result<Vec<u32>, EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| EmbeddingError::TokenizationFailed(format!("Encoding failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Returns the vocabulary size, including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Returns a reference to the underlying tokenizer.
    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl TokenCounter for TokenizerHandle {
    fn count_tokens(&self, text: &str) -> Result<usize, EmbeddingError> {
        Ok(self.tokenize(text)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal word-level tokenizer: lower-cases, splits on whitespace and
    /// punctuation, unknown words map to id 0.
    const WORD_LEVEL_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": { "type": "Lowercase" },
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "[UNK]": 0, "hello": 1, "world": 2, "rust": 3 },
            "unk_token": "[UNK]"
        }
    }"#;

    fn load_test_tokenizer() -> TokenizerHandle {
        TokenizerHandle::from_bytes(WORD_LEVEL_JSON).unwrap()
    }

    #[test]
    fn test_tokenize_basic() {
        let handle = load_test_tokenizer();
        assert_eq!(handle.tokenize("hello world").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_tokenize_normalizes_case() {
        let handle = load_test_tokenizer();
        assert_eq!(
            handle.tokenize("Hello RUST").unwrap(),
            handle.tokenize("hello rust").unwrap()
        );
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let handle = load_test_tokenizer();
        assert_eq!(handle.tokenize("hello ferris").unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_count_matches_tokenize() {
        let handle = load_test_tokenizer();
        let text = "hello, world!";
        assert_eq!(
            handle.count_tokens(text).unwrap(),
            handle.tokenize(text).unwrap().len()
        );
        assert_eq!(handle.count_tokens("").unwrap(), 0);
    }

    #[test]
    fn test_invalid_bytes_rejected() {
        let result = TokenizerHandle::from_bytes("not a tokenizer");
        assert!(matches!(
            result,
            Err(EmbeddingError::TokenizerUnavailable(_))
        ));
    }

    #[test]
    fn test_missing_file_rejected() {
        let result = TokenizerHandle::from_file("/nonexistent/tokenizer.json");
        assert!(result.is_err());
    }

    #[test]
    fn test_vocab_size_and_clone() {
        let handle = load_test_tokenizer();
        let cloned = handle.clone();
        assert_eq!(handle.vocab_size(), 4);
        assert_eq!(
            handle.tokenize("rust").unwrap(),
            cloned.tokenize("rust").unwrap()
        );
    }
}
