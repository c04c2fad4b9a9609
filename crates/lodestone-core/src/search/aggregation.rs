//! Chunk-to-file score aggregation.
//!
//! Retrieval runs over chunks but results are files. Each strategy here
//! collapses one file's chunk scores (ordered best first) into a single file
//! score. All strategies are pure and stateless; BM25 and vector signals pick
//! theirs independently through [`AggregationConfig`].
//!
//! | Method | File score |
//! |--------|------------|
//! | `max_p` | best chunk score |
//! | `top_m_sum` | sum of the best `m` scores |
//! | `top_m_avg` | mean of the best `m` scores |
//! | `rrf_per_doc` | `sum_{r=1..n} 1/(rrf_k + r)` (rank-only) |
//! | `weighted_top_l_sum` | `sum_{i<l} decay^i * s_i` |
//!
//! BM25 defaults to `max_p` (a single strong keyword passage decides) while
//! vectors default to `weighted_top_l_sum` (several moderately similar chunks
//! should add up).

use super::types::{file_path_of, ScoredId, SearchError};
use crate::config::{DEFAULT_AGG_DECAY, DEFAULT_AGG_L, DEFAULT_AGG_M, RRF_K};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Chunk aggregation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    MaxP,
    TopMSum,
    TopMAvg,
    RrfPerDoc,
    WeightedTopLSum,
}

impl AggregationMethod {
    pub const ALL: [AggregationMethod; 5] = [
        AggregationMethod::MaxP,
        AggregationMethod::TopMSum,
        AggregationMethod::TopMAvg,
        AggregationMethod::RrfPerDoc,
        AggregationMethod::WeightedTopLSum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::MaxP => "max_p",
            AggregationMethod::TopMSum => "top_m_sum",
            AggregationMethod::TopMAvg => "top_m_avg",
            AggregationMethod::RrfPerDoc => "rrf_per_doc",
            AggregationMethod::WeightedTopLSum => "weighted_top_l_sum",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregationMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                SearchError::InvalidQuery(format!("unknown aggregation method '{}'", s))
            })
    }
}

/// Strategy plus its parameters.
///
/// Parameters unused by the selected method are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub method: AggregationMethod,
    /// Chunks used by `top_m_sum` / `top_m_avg`
    pub m: usize,
    /// Chunks used by `weighted_top_l_sum`
    pub l: usize,
    /// Per-rank decay of `weighted_top_l_sum`
    pub decay: f32,
    /// Rank constant of `rrf_per_doc`
    pub rrf_k: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self::with_method(AggregationMethod::MaxP)
    }
}

impl AggregationConfig {
    pub fn with_method(method: AggregationMethod) -> Self {
        Self {
            method,
            m: DEFAULT_AGG_M,
            l: DEFAULT_AGG_L,
            decay: DEFAULT_AGG_DECAY,
            rrf_k: RRF_K,
        }
    }

    /// Default for the BM25 signal.
    pub fn bm25_default() -> Self {
        Self::with_method(AggregationMethod::MaxP)
    }

    /// Default for the vector signal.
    pub fn vector_default() -> Self {
        Self::with_method(AggregationMethod::WeightedTopLSum)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        match self.method {
            AggregationMethod::TopMSum | AggregationMethod::TopMAvg if self.m == 0 => Err(
                SearchError::InvalidQuery(format!("{} requires m >= 1", self.method)),
            ),
            AggregationMethod::WeightedTopLSum if self.l == 0 => Err(SearchError::InvalidQuery(
                "weighted_top_l_sum requires l >= 1".to_string(),
            )),
            AggregationMethod::WeightedTopLSum
                if !self.decay.is_finite() || self.decay < 0.0 =>
            {
                Err(SearchError::InvalidQuery(format!(
                    "weighted_top_l_sum decay must be non-negative, got {}",
                    self.decay
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Collapses one file's chunk scores into a file score.
///
/// `scores` may arrive in any order; they are ranked best first here. An
/// empty slice scores 0.
pub fn aggregate_scores(scores: &[f32], config: &AggregationConfig) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    match config.method {
        AggregationMethod::MaxP => sorted[0],
        AggregationMethod::TopMSum => sorted.iter().take(config.m.max(1)).sum(),
        AggregationMethod::TopMAvg => {
            let top: Vec<f32> = sorted.iter().take(config.m.max(1)).copied().collect();
            top.iter().sum::<f32>() / top.len() as f32
        }
        AggregationMethod::RrfPerDoc => (1..=sorted.len())
            .map(|rank| 1.0 / (config.rrf_k + rank) as f32)
            .sum(),
        AggregationMethod::WeightedTopLSum => {
            let mut weight = 1.0f32;
            let mut total = 0.0f32;
            for score in sorted.iter().take(config.l.max(1)) {
                total += weight * score;
                weight *= config.decay;
            }
            total
        }
    }
}

/// Aggregates every file in `per_file`.
pub fn aggregate(
    per_file: &HashMap<String, Vec<f32>>,
    config: &AggregationConfig,
) -> HashMap<String, f32> {
    per_file
        .iter()
        .map(|(file, scores)| (file.clone(), aggregate_scores(scores, config)))
        .collect()
}

/// Chunk hits of one file, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHits {
    pub file_path: String,
    pub chunks: Vec<ScoredId>,
}

impl FileHits {
    pub fn scores(&self) -> Vec<f32> {
        self.chunks.iter().map(|c| c.score).collect()
    }

    /// Highest-scoring chunk (hits are kept best first).
    pub fn best(&self) -> Option<&ScoredId> {
        self.chunks.first()
    }
}

/// Groups chunk-level hits by source file.
///
/// Files keep the order of their first appearance in `hits`; chunks within a
/// file are sorted best first.
pub fn group_by_file(hits: &[ScoredId]) -> Vec<FileHits> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ScoredId>> = HashMap::new();

    for hit in hits {
        let file = file_path_of(&hit.id);
        if !groups.contains_key(file) {
            order.push(file.to_string());
        }
        groups.entry(file.to_string()).or_default().push(hit.clone());
    }

    order
        .into_iter()
        .filter_map(|file_path| {
            let mut chunks = groups.remove(&file_path)?;
            chunks.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            Some(FileHits { file_path, chunks })
        })
        .collect()
}

/// Groups hits by file, aggregates, and returns files ranked best first.
///
/// Equal scores are ordered by file path so rankings are reproducible.
pub fn rank_files(hits: &[ScoredId], config: &AggregationConfig) -> Vec<ScoredId> {
    let mut ranked: Vec<ScoredId> = group_by_file(hits)
        .into_iter()
        .map(|group| {
            let score = aggregate_scores(&group.scores(), config);
            ScoredId::new(group.file_path, score)
        })
        .collect();
    sort_ranked(&mut ranked);
    ranked
}

/// Sorts by score descending, then id ascending.
pub(crate) fn sort_ranked(ranked: &mut [ScoredId]) {
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
