//! Standard Information Retrieval metrics for evaluating search quality.
//!
//! This module implements metrics commonly used in IR research:
//! - NDCG (Normalized Discounted Cumulative Gain)
//! - MAP (Mean Average Precision)
//! - MRR (Mean Reciprocal Rank)
//! - Precision@k, Recall@k
//!
//! Results are ranked [`ScoredId`]s (best first) whose ids are document ids,
//! usually file paths; judgments are graded relevance labels for one query.
//!
//! # References
//!
//! - Järvelin & Kekäläinen (2002). "Cumulated gain-based evaluation of IR techniques"
//! - Voorhees & Harman (2005). "TREC: Experiment and Evaluation in Information Retrieval"

use crate::search::types::ScoredId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Graded relevance judgment for a document.
///
/// Relevance is typically graded on a 3-point scale:
/// - 0: Not relevant
/// - 1: Somewhat relevant (partial match)
/// - 2: Highly relevant (perfect match)
///
/// Binary datasets use 0 or 1, which works fine with these metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceJudgment {
    pub doc_id: String,
    /// Relevance grade (0 = not relevant)
    pub relevance: u8,
}

impl RelevanceJudgment {
    pub fn new(doc_id: impl Into<String>, relevance: u8) -> Self {
        Self {
            doc_id: doc_id.into(),
            relevance,
        }
    }

    /// Binary relevance judgment (relevance = 1).
    pub fn relevant(doc_id: impl Into<String>) -> Self {
        Self::new(doc_id, 1)
    }

    pub fn is_relevant(&self) -> bool {
        self.relevance > 0
    }
}

/// Evaluation metrics for a single query at the cutoffs used in reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMetrics {
    pub ndcg_at_k: BTreeMap<usize, f64>,
    pub recall_at_k: BTreeMap<usize, f64>,
    pub precision_at_k: BTreeMap<usize, f64>,
    pub mrr_at_10: f64,
    pub average_precision: f64,
}

impl QueryMetrics {
    /// Standard cutoffs: 1, 3, 5, 10, 20, 100.
    pub const K_VALUES: [usize; 6] = [1, 3, 5, 10, 20, 100];

    /// Computes every metric for one query.
    pub fn compute(results: &[ScoredId], judgments: &[RelevanceJudgment]) -> Self {
        let mut metrics = Self {
            mrr_at_10: reciprocal_rank_at_k(results, judgments, 10),
            average_precision: average_precision(results, judgments),
            ..Default::default()
        };
        for k in Self::K_VALUES {
            metrics.ndcg_at_k.insert(k, ndcg_at_k(results, judgments, k));
            metrics.recall_at_k.insert(k, recall_at_k(results, judgments, k));
            metrics
                .precision_at_k
                .insert(k, precision_at_k(results, judgments, k));
        }
        metrics
    }
}

fn relevant_set(judgments: &[RelevanceJudgment]) -> HashSet<&str> {
    judgments
        .iter()
        .filter(|j| j.is_relevant())
        .map(|j| j.doc_id.as_str())
        .collect()
}

// ============================================================================
// NDCG (Normalized Discounted Cumulative Gain)
// ============================================================================

/// Computes NDCG@k.
///
/// # Formula
///
/// ```text
/// DCG@k = Σ (2^rel_i - 1) / log₂(i + 1)  for i in 1..=k
/// IDCG@k = DCG of ideal (perfectly sorted) ranking
/// NDCG@k = DCG@k / IDCG@k
/// ```
///
/// Returns 0.0 when the query has no relevant documents.
pub fn ndcg_at_k(results: &[ScoredId], judgments: &[RelevanceJudgment], k: usize) -> f64 {
    let rel_map: HashMap<&str, u8> = judgments
        .iter()
        .map(|j| (j.doc_id.as_str(), j.relevance))
        .collect();

    let dcg: f64 = results
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, result)| {
            let rel = rel_map.get(result.id.as_str()).copied().unwrap_or(0);
            gain(rel) / discount(i + 1)
        })
        .sum();

    let mut ideal_rels: Vec<u8> = judgments.iter().map(|j| j.relevance).collect();
    ideal_rels.sort_by(|a, b| b.cmp(a));
    let idcg: f64 = ideal_rels
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, &rel)| gain(rel) / discount(i + 1))
        .sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

/// Exponential gain: 2^rel - 1 (rel=0 -> 0, rel=1 -> 1, rel=2 -> 3).
#[inline]
fn gain(relevance: u8) -> f64 {
    2f64.powi(i32::from(relevance)) - 1.0
}

/// Logarithmic discount for a 1-indexed position: log₂(position + 1).
#[inline]
fn discount(position: usize) -> f64 {
    (position as f64 + 1.0).log2()
}

// ============================================================================
// MAP (Mean Average Precision)
// ============================================================================

/// Computes Average Precision for a single query.
///
/// ```text
/// AP = (1 / |relevant|) * Σ P(k) * rel(k)
/// ```
///
/// Returns 0.0 if no relevant documents exist.
pub fn average_precision(results: &[ScoredId], judgments: &[RelevanceJudgment]) -> f64 {
    let relevant = relevant_set(judgments);
    if relevant.is_empty() {
        return 0.0;
    }

    let mut precision_sum = 0.0;
    let mut relevant_found = 0;
    for (i, result) in results.iter().enumerate() {
        if relevant.contains(result.id.as_str()) {
            relevant_found += 1;
            precision_sum += relevant_found as f64 / (i + 1) as f64;
        }
    }
    precision_sum / relevant.len() as f64
}

// ============================================================================
// MRR (Mean Reciprocal Rank)
// ============================================================================

/// 1 / position of the first relevant result within the top `k`, else 0.
pub fn reciprocal_rank_at_k(results: &[ScoredId], judgments: &[RelevanceJudgment], k: usize) -> f64 {
    let relevant = relevant_set(judgments);
    results
        .iter()
        .take(k)
        .position(|r| relevant.contains(r.id.as_str()))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

// ============================================================================
// Set-Based Metrics: Precision, Recall
// ============================================================================

/// Fraction of the top `k` results that are relevant.
pub fn precision_at_k(results: &[ScoredId], judgments: &[RelevanceJudgment], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let relevant = relevant_set(judgments);
    let hits = results
        .iter()
        .take(k)
        .filter(|r| relevant.contains(r.id.as_str()))
        .count();
    hits as f64 / k as f64
}

/// Fraction of all relevant documents found in the top `k` results.
///
/// Returns 0.0 when the query has no relevant documents.
pub fn recall_at_k(results: &[ScoredId], judgments: &[RelevanceJudgment], k: usize) -> f64 {
    let relevant = relevant_set(judgments);
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = results
        .iter()
        .take(k)
        .filter(|r| relevant.contains(r.id.as_str()))
        .count();
    hits as f64 / relevant.len() as f64
}

/// Arithmetic mean, 0.0 for an empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
