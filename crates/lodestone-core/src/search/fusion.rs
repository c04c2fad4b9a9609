//! Weighted Reciprocal Rank Fusion and title/content combination.

use super::aggregation::sort_ranked;
use super::types::{FusionWeights, ScoredId};
use std::collections::HashMap;

/// Which signals take part in a search, derived from the weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// Both signals weighted: fuse by RRF
    Hybrid,
    /// Only the embedding signal: raw aggregated scores pass through
    VectorOnly,
    /// Only the BM25 signal: raw aggregated scores pass through
    Bm25Only,
}

impl SignalMode {
    /// Picks the mode for validated weights.
    pub fn from_weights(weights: &FusionWeights) -> Self {
        match (weights.embedding > 0.0, weights.bm25 > 0.0) {
            (true, true) => SignalMode::Hybrid,
            (true, false) => SignalMode::VectorOnly,
            _ => SignalMode::Bm25Only,
        }
    }

    pub fn uses_vector(self) -> bool {
        matches!(self, SignalMode::Hybrid | SignalMode::VectorOnly)
    }

    pub fn uses_bm25(self) -> bool {
        matches!(self, SignalMode::Hybrid | SignalMode::Bm25Only)
    }
}

/// Highest possible weighted RRF score: rank 1 in both signals.
pub fn rrf_max(embedding_weight: f32, bm25_weight: f32, k: usize) -> f32 {
    (embedding_weight + bm25_weight) / (k as f32 + 1.0)
}

/// Fuses two file rankings with weighted RRF, normalized to `[0, 1]`.
///
/// Formula: `score(f) = w_emb / (k + rank_vec(f)) + w_bm25 / (k + rank_bm25(f))`
///
/// Ranks are 1-based positions in each input (inputs must already be sorted
/// best first). A file missing from one ranking gets nothing from it. The sum
/// is divided by [`rrf_max`], so a file ranked first by both signals scores 1.
pub fn weighted_rrf(
    vector_ranking: &[ScoredId],
    bm25_ranking: &[ScoredId],
    embedding_weight: f32,
    bm25_weight: f32,
    k: usize,
) -> Vec<ScoredId> {
    let k_param = k as f32;
    let mut rrf_scores: HashMap<&str, f32> = HashMap::new();

    for (weight, ranking) in [
        (embedding_weight, vector_ranking),
        (bm25_weight, bm25_ranking),
    ] {
        for (rank, item) in ranking.iter().enumerate() {
            let rank_position = (rank + 1) as f32;
            *rrf_scores.entry(item.id.as_str()).or_insert(0.0) += weight / (k_param + rank_position);
        }
    }

    let max = rrf_max(embedding_weight, bm25_weight, k);
    let mut fused: Vec<ScoredId> = rrf_scores
        .into_iter()
        .map(|(id, score)| {
            let normalized = if max > 0.0 { score / max } else { 0.0 };
            ScoredId::new(id, normalized)
        })
        .collect();
    sort_ranked(&mut fused);
    fused
}

/// Produces the field-level file ranking for the active signal mode.
///
/// Hybrid mode fuses by RRF; single-signal modes return that signal's
/// ranking unchanged, raw aggregated scores included.
pub fn fuse_signals(
    vector_ranking: &[ScoredId],
    bm25_ranking: &[ScoredId],
    weights: &FusionWeights,
    k: usize,
) -> Vec<ScoredId> {
    match SignalMode::from_weights(weights) {
        SignalMode::Hybrid => weighted_rrf(
            vector_ranking,
            bm25_ranking,
            weights.embedding,
            weights.bm25,
            k,
        ),
        SignalMode::VectorOnly => vector_ranking.to_vec(),
        SignalMode::Bm25Only => bm25_ranking.to_vec(),
    }
}

/// Combines title and content rankings into the final file ranking.
///
/// `final = (w_title * title + w_content * content) / (w_title + w_content)`,
/// where a file absent from one field scores 0 there.
pub fn combine_fields(
    title_ranking: &[ScoredId],
    content_ranking: &[ScoredId],
    title_weight: f32,
    content_weight: f32,
) -> Vec<ScoredId> {
    let total_weight = title_weight + content_weight;
    if total_weight <= 0.0 {
        return Vec::new();
    }

    let mut combined: HashMap<&str, f32> = HashMap::new();
    for item in title_ranking {
        *combined.entry(item.id.as_str()).or_insert(0.0) += title_weight * item.score;
    }
    for item in content_ranking {
        *combined.entry(item.id.as_str()).or_insert(0.0) += content_weight * item.score;
    }

    let mut ranked: Vec<ScoredId> = combined
        .into_iter()
        .map(|(id, score)| ScoredId::new(id, score / total_weight))
        .collect();
    sort_ranked(&mut ranked);
    ranked
}
