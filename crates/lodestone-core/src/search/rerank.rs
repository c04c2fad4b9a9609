//! Cross-encoder reranking pass over merged candidates.
//!
//! The reranker scores each candidate chunk against the query; chunk scores
//! are aggregated per file and min-max normalized so the final file scores
//! lie in `[0, 1]`.

use super::aggregation::{rank_files, AggregationConfig};
use super::types::{ChunkMetadata, ScoredId, SearchError};
use crate::embedding::Reranker;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// File ranking produced by a rerank pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RerankOutcome {
    /// Files, best first, scores normalized to `[0, 1]`
    pub files: Vec<ScoredId>,
    /// Raw reranker score of every candidate chunk
    pub chunks: Vec<ScoredId>,
}

/// Drops repeated ids, keeping the first occurrence.
pub fn dedupe_candidates(candidates: Vec<ChunkMetadata>) -> Vec<ChunkMetadata> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|chunk| seen.insert(chunk.id.clone()))
        .collect()
}

/// Rescales scores to `[0, 1]` in place.
///
/// A single item, or items that all score the same, normalize to 1.0.
pub fn min_max_normalize(items: &mut [ScoredId]) {
    let (min, max) = items.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), item| {
        (lo.min(item.score), hi.max(item.score))
    });
    let range = max - min;
    for item in items.iter_mut() {
        item.score = if range > 0.0 && range.is_finite() {
            (item.score - min) / range
        } else {
            1.0
        };
    }
}

/// Reranks `candidates` and ranks their files.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub async fn rerank_candidates(
    reranker: &dyn Reranker,
    query: &str,
    candidates: &[ChunkMetadata],
    config: &AggregationConfig,
) -> Result<RerankOutcome, SearchError> {
    if candidates.is_empty() {
        return Ok(RerankOutcome::default());
    }

    let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();
    let scores = reranker
        .rerank(query, &texts)
        .await
        .map_err(|e| SearchError::RerankError(e.to_string()))?;
    if scores.len() != candidates.len() {
        return Err(SearchError::RerankError(format!(
            "reranker returned {} scores for {} documents",
            scores.len(),
            candidates.len()
        )));
    }

    let chunks: Vec<ScoredId> = candidates
        .iter()
        .zip(scores)
        .map(|(chunk, score)| ScoredId::new(chunk.id.clone(), score))
        .collect();
    let mut files = rank_files(&chunks, config);
    min_max_normalize(&mut files);

    debug!("Reranked {} chunks into {} files", chunks.len(), files.len());
    Ok(RerankOutcome { files, chunks })
}
