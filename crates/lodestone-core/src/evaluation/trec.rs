//! TREC run and qrels files, and run-level evaluation.
//!
//! Run lines are `{qid} Q0 {doc} {rank} {score} {run_id}` with 1-based
//! ranks. Qrels come either as TREC lines (`{qid} 0 {doc} {rel}`) or as the
//! BEIR-style TSV with a `query-id\tcorpus-id\tscore` header.

use super::metrics::{
    average_precision, mean, ndcg_at_k, recall_at_k, reciprocal_rank_at_k, RelevanceJudgment,
};
use crate::search::types::{ScoredId, SearchError, SearchOptions};
use crate::search::HybridSearchEngine;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info};

/// Ranked results per query id.
pub type Run = BTreeMap<String, Vec<ScoredId>>;

/// Relevance judgments per query id.
pub type Qrels = BTreeMap<String, Vec<RelevanceJudgment>>;

/// Errors raised while reading run or qrels text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },
}

fn parse_error(line: usize, message: impl Into<String>) -> EvalError {
    EvalError::Parse {
        line,
        message: message.into(),
    }
}

/// Formats one run line.
pub fn format_run_line(qid: &str, doc_id: &str, rank: usize, score: f32, run_id: &str) -> String {
    format!("{} Q0 {} {} {:.6} {}", qid, doc_id, rank, score, run_id)
}

/// Formats a whole run, queries in id order, one line per result.
pub fn format_run(run: &Run, run_id: &str) -> String {
    let mut out = String::new();
    for (qid, results) in run {
        for (i, result) in results.iter().enumerate() {
            // Writing to a String cannot fail
            let _ = writeln!(
                out,
                "{}",
                format_run_line(qid, &result.id, i + 1, result.score, run_id)
            );
        }
    }
    out
}

/// Parses run text. Results of each query are ordered by their rank column.
pub fn parse_run(text: &str) -> Result<Run, EvalError> {
    let mut ranked: BTreeMap<String, Vec<(usize, ScoredId)>> = BTreeMap::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let &[qid, _, doc_id, rank, score, _] = fields.as_slice() else {
            return Err(parse_error(line_no, "expected 6 fields"));
        };
        let rank: usize = rank
            .parse()
            .map_err(|_| parse_error(line_no, format!("bad rank '{}'", rank)))?;
        let score: f32 = score
            .parse()
            .map_err(|_| parse_error(line_no, format!("bad score '{}'", score)))?;
        ranked
            .entry(qid.to_string())
            .or_default()
            .push((rank, ScoredId::new(doc_id, score)));
    }

    Ok(ranked
        .into_iter()
        .map(|(qid, mut results)| {
            results.sort_by_key(|(rank, _)| *rank);
            (qid, results.into_iter().map(|(_, r)| r).collect())
        })
        .collect())
}

/// Parses TREC qrels (`qid iteration doc relevance`). Blank lines and lines
/// starting with `#` are ignored; negative grades count as not relevant.
pub fn parse_trec_qrels(text: &str) -> Result<Qrels, EvalError> {
    let mut qrels = Qrels::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let &[qid, _, doc_id, relevance] = fields.as_slice() else {
            return Err(parse_error(line_no, "expected 4 fields"));
        };
        let relevance = parse_grade(relevance, line_no)?;
        qrels
            .entry(qid.to_string())
            .or_default()
            .push(RelevanceJudgment::new(doc_id, relevance));
    }
    Ok(qrels)
}

/// Parses TSV qrels with a `query-id`, `corpus-id`, `score` header.
pub fn parse_tsv_qrels(text: &str) -> Result<Qrels, EvalError> {
    let mut lines = text.lines().enumerate();
    let header: Vec<&str> = match lines.next() {
        Some((_, header)) => header.split('\t').map(str::trim).collect(),
        None => return Ok(Qrels::new()),
    };
    let column = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .ok_or_else(|| parse_error(1, format!("missing '{}' column", name)))
    };
    let (qid_col, doc_col, score_col) = (column("query-id")?, column("corpus-id")?, column("score")?);

    let mut qrels = Qrels::new();
    for (index, line) in lines {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let field = |col: usize| {
            fields
                .get(col)
                .copied()
                .ok_or_else(|| parse_error(line_no, "missing column"))
        };
        let relevance = parse_grade(field(score_col)?, line_no)?;
        qrels
            .entry(field(qid_col)?.to_string())
            .or_default()
            .push(RelevanceJudgment::new(field(doc_col)?, relevance));
    }
    Ok(qrels)
}

fn parse_grade(text: &str, line_no: usize) -> Result<u8, EvalError> {
    let grade: i64 = text
        .parse()
        .map_err(|_| parse_error(line_no, format!("bad relevance '{}'", text)))?;
    Ok(grade.clamp(0, i64::from(u8::MAX)) as u8)
}

/// Mean metrics of one run over a set of judged queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetrics {
    /// Queries evaluated (those with at least one relevant document)
    pub queries: usize,
    pub ndcg_at_10: f64,
    pub recall_at_10: f64,
    pub recall_at_100: f64,
    pub mrr_at_10: f64,
    pub map: f64,
}

/// Evaluates `run` against `qrels`.
///
/// Every query with a relevant judgment is evaluated; a query absent from the
/// run scores zero on every metric.
pub fn evaluate_run(run: &Run, qrels: &Qrels) -> RunMetrics {
    let empty = Vec::new();
    let mut ndcg = Vec::new();
    let mut r10 = Vec::new();
    let mut r100 = Vec::new();
    let mut mrr = Vec::new();
    let mut ap = Vec::new();

    for (qid, judgments) in qrels {
        if !judgments.iter().any(|j| j.is_relevant()) {
            continue;
        }
        let results = run.get(qid).unwrap_or(&empty);
        ndcg.push(ndcg_at_k(results, judgments, 10));
        r10.push(recall_at_k(results, judgments, 10));
        r100.push(recall_at_k(results, judgments, 100));
        mrr.push(reciprocal_rank_at_k(results, judgments, 10));
        ap.push(average_precision(results, judgments));
    }

    RunMetrics {
        queries: ndcg.len(),
        ndcg_at_10: mean(&ndcg),
        recall_at_10: mean(&r10),
        recall_at_100: mean(&r100),
        mrr_at_10: mean(&mrr),
        map: mean(&ap),
    }
}

/// Runs `queries` (`(qid, text)`) through `engine` and collects a run of file
/// paths.
pub async fn collect_run(
    engine: &HybridSearchEngine,
    queries: &[(String, String)],
    options: &SearchOptions,
) -> Result<Run, SearchError> {
    let mut run = Run::new();
    for (qid, text) in queries {
        let results = engine.search(text, options).await?;
        debug!("Query {}: {} results", qid, results.len());
        run.insert(
            qid.clone(),
            results
                .into_iter()
                .map(|r| ScoredId::new(r.file_path, r.score))
                .collect(),
        );
    }
    info!("Collected run over {} queries", run.len());
    Ok(run)
}
