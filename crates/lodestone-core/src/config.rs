//! Engine configuration.
//!
//! Two layers live here:
//!
//! - Documented `pub const` defaults used throughout the crate and its tests.
//! - [`EngineConfig`], the serde-loadable configuration for an engine
//!   instance, and [`ConfigHandle`], a `watch`-channel handle that publishes
//!   search-option changes to whoever holds a subscription.
//!
//! # Usage
//!
//! ```
//! use lodestone_core::config::{ConfigHandle, EngineConfig, MAX_CHUNK_TOKENS};
//!
//! let config = EngineConfig::from_json_str(r#"{ "max_retries": 5 }"#).unwrap();
//! assert_eq!(config.chunking.max_tokens, MAX_CHUNK_TOKENS);
//!
//! let handle = ConfigHandle::new(config.search.clone());
//! handle.update(|opts| opts.top_k = 20).unwrap();
//! assert_eq!(handle.current().top_k, 20);
//! ```

use crate::chunking::ChunkerConfig;
use crate::search::types::SearchOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

// =============================================================================
// BM25 Scoring
// =============================================================================

/// BM25 term-frequency saturation parameter.
pub const BM25_K1: f32 = 1.2;

/// BM25 document-length normalization parameter.
pub const BM25_B: f32 = 0.75;

// =============================================================================
// Fusion and Aggregation
// =============================================================================

/// Reciprocal Rank Fusion constant.
///
/// Standard value from Cormack et al. (2009). Used both for hybrid fusion and
/// for the `rrf_per_doc` chunk aggregation.
pub const RRF_K: usize = 60;

/// Number of results returned when the caller does not ask for a specific count.
pub const DEFAULT_TOP_K: usize = 10;

/// Chunk candidates fetched per signal = `top_k * DEFAULT_RETRIEVAL_MULTIPLIER`.
///
/// Files usually contribute several chunks, so the chunk-level pool must be
/// much larger than the file-level result list.
pub const DEFAULT_RETRIEVAL_MULTIPLIER: usize = 10;

/// Chunks considered by `top_m_sum` / `top_m_avg`.
pub const DEFAULT_AGG_M: usize = 3;

/// Chunks considered by `weighted_top_l_sum`.
pub const DEFAULT_AGG_L: usize = 3;

/// Geometric decay applied by `weighted_top_l_sum`.
pub const DEFAULT_AGG_DECAY: f32 = 0.5;

/// Default weight of the embedding signal in hybrid fusion.
pub const DEFAULT_EMBEDDING_WEIGHT: f32 = 0.6;

/// Default weight of the BM25 signal in hybrid fusion.
pub const DEFAULT_BM25_WEIGHT: f32 = 0.4;

/// Default weight of the title field when combining title and content scores.
pub const DEFAULT_TITLE_WEIGHT: f32 = 0.3;

/// Default weight of the content field when combining title and content scores.
pub const DEFAULT_CONTENT_WEIGHT: f32 = 0.7;

// =============================================================================
// Text Chunking
// =============================================================================

/// Maximum tokens per chunk.
pub const MAX_CHUNK_TOKENS: usize = 512;

/// Tokens of trailing context repeated at the start of the next chunk.
pub const CHUNK_OVERLAP_TOKENS: usize = 64;

/// Deepest heading level tracked in chunk heading paths (`###`).
pub const MAX_HEADING_LEVEL: usize = 3;

/// How far (in chars) a forced split may back off looking for whitespace.
pub const FORCE_SPLIT_LOOKBACK_CHARS: usize = 50;

// =============================================================================
// Identifiers
// =============================================================================

/// Suffix of the title pseudo-chunk id (`path#title`).
pub const TITLE_ID_SUFFIX: &str = "title";

/// Separator between the file path and the chunk index or title marker.
pub const CHUNK_ID_SEPARATOR: char = '#';

// =============================================================================
// Bulk Sync
// =============================================================================

/// Failed attempts after which a file is skipped until it changes on disk.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors raised while loading or updating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration text could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(String),
    /// Configuration parsed but holds values the engine cannot run with
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete configuration of one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Chunk sizing
    pub chunking: ChunkerConfig,
    /// Defaults applied to searches that do not override options
    pub search: SearchOptions,
    /// Failed attempts before bulk sync stops retrying an unchanged file
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkerConfig::default(),
            search: SearchOptions::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document. Missing keys fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.search
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

/// Shared handle to the live search options.
///
/// Cloning the handle shares the same channel. Each `update` publishes a full
/// snapshot; subscribers either poll [`ConfigHandle::current`] or await
/// changes on the receiver from [`ConfigHandle::subscribe`].
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<SearchOptions>>,
}

impl ConfigHandle {
    /// Creates a handle holding `initial`.
    pub fn new(initial: SearchOptions) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Returns the latest published options.
    pub fn current(&self) -> SearchOptions {
        self.tx.borrow().clone()
    }

    /// Applies `f` to a copy of the current options and publishes the result.
    ///
    /// The update is rejected, and nothing is published, if the new options
    /// fail validation.
    pub fn update<F>(&self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut SearchOptions),
    {
        let mut next = self.current();
        f(&mut next);
        next.validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        debug!(top_k = next.top_k, rerank = next.rerank, "Publishing search options");
        self.tx.send_replace(next);
        Ok(())
    }

    /// Returns a receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SearchOptions> {
        self.tx.subscribe()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(SearchOptions::default())
    }
}
