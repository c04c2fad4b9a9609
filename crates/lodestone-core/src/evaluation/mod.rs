//! Evaluation framework for measuring retrieval quality.
//!
//! This module provides standard Information Retrieval (IR) metrics and the
//! TREC file formats used to exchange runs and relevance judgments with
//! external tooling.
//!
//! # Overview
//!
//! - **Graded relevance**: documents can have multiple relevance levels
//!   (0 = not, 1 = somewhat, 2 = highly relevant)
//! - **Position-aware metrics**: NDCG accounts for where relevant results appear
//! - **Run files**: [`collect_run`] runs a query set through the engine and
//!   [`format_run`] writes the standard six-column format
//!
//! # Example
//!
//! ```ignore
//! use lodestone_core::evaluation::{collect_run, evaluate_run, parse_tsv_qrels};
//!
//! let qrels = parse_tsv_qrels(&std::fs::read_to_string("qrels.tsv")?)?;
//! let run = collect_run(&engine, &queries, &SearchOptions::default()).await?;
//! let metrics = evaluate_run(&run, &qrels);
//! println!("nDCG@10 {:.4}  MRR@10 {:.4}", metrics.ndcg_at_10, metrics.mrr_at_10);
//! ```
//!
//! # Metrics Reference
//!
//! | Metric | Description | Use Case |
//! |--------|-------------|----------|
//! | NDCG@k | Normalized Discounted Cumulative Gain | Graded relevance, position-aware |
//! | MAP | Mean Average Precision | Overall precision-recall tradeoff |
//! | MRR@k | Mean Reciprocal Rank | Finding first relevant result |
//! | P@k | Precision at k | Fraction of top-k that are relevant |
//! | R@k | Recall at k | Fraction of relevant found in top-k |

pub mod metrics;
pub mod trec;

pub use metrics::{
    average_precision, mean, ndcg_at_k, precision_at_k, recall_at_k, reciprocal_rank_at_k,
    QueryMetrics, RelevanceJudgment,
};
pub use trec::{
    collect_run, evaluate_run, format_run, format_run_line, parse_run, parse_trec_qrels,
    parse_tsv_qrels, EvalError, Qrels, Run, RunMetrics,
};
