//! Query path: per-field retrieval, fusion, optional rerank, hydration.

use super::HybridSearchEngine;
use crate::config::CHUNK_ID_SEPARATOR;
use crate::embedding::{EmbedKind, Reranker};
use crate::error::EmbeddingError;
use crate::search::aggregation::rank_files;
use crate::search::fusion::{combine_fields, fuse_signals, SignalMode};
use crate::search::rerank::{dedupe_candidates, rerank_candidates, RerankOutcome};
use crate::search::types::{
    file_path_of, title_from_path, validate_dimension, ChunkMetadata, Field, ScoredId,
    SearchError, SearchOptions, SearchResult, TopChunk,
};
use tracing::{debug, instrument, warn};

/// Chunk hits and file rankings of one field.
#[derive(Default)]
struct FieldRetrieval {
    vector_hits: Vec<ScoredId>,
    bm25_hits: Vec<ScoredId>,
    vector_files: Vec<ScoredId>,
    bm25_files: Vec<ScoredId>,
    fused: Vec<ScoredId>,
}

impl FieldRetrieval {
    /// Chunk ids from both signals; title pseudo-chunks are left out.
    fn content_candidate_ids(&self) -> impl Iterator<Item = &str> {
        self.vector_hits
            .iter()
            .chain(self.bm25_hits.iter())
            .map(|hit| hit.id.as_str())
            .filter(|id| Field::Content.matches(id))
    }
}

/// Which chunk scores decide the top chunk of a result.
enum ChunkEvidence<'a> {
    Reranked(&'a [ScoredId]),
    Signals {
        retrieval: &'a FieldRetrieval,
        mode: SignalMode,
    },
}

impl HybridSearchEngine {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self
            .provider
            .embed(&[query.to_string()], EmbedKind::Query)
            .await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            }
            .into());
        }
        let embedding = vectors.swap_remove(0);
        validate_dimension(self.dimension(), embedding.len())?;
        Ok(embedding)
    }

    async fn retrieve_field(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        field: Field,
        options: &SearchOptions,
    ) -> Result<FieldRetrieval, SearchError> {
        let pool = options.candidate_pool();
        let mode = SignalMode::from_weights(&options.weights);

        let vector_hits = match query_embedding {
            Some(embedding) => {
                let mut hits = self.vectors.search(embedding, field)?;
                hits.truncate(pool);
                hits
            }
            None => Vec::new(),
        };
        let bm25_hits = if mode.uses_bm25() {
            self.keyword.search_field(query, pool, field).await?
        } else {
            Vec::new()
        };

        let vector_files = rank_files(&vector_hits, &options.vector_aggregation);
        let bm25_files = rank_files(&bm25_hits, &options.bm25_aggregation);
        let fused = fuse_signals(&vector_files, &bm25_files, &options.weights, options.rrf_k);

        debug!(
            "{:?}: {} vector hits, {} bm25 hits, {} files",
            field,
            vector_hits.len(),
            bm25_hits.len(),
            fused.len()
        );
        Ok(FieldRetrieval {
            vector_hits,
            bm25_hits,
            vector_files,
            bm25_files,
            fused,
        })
    }

    /// Reranks the content chunks retrieved by either signal.
    ///
    /// Returns `None` when there is nothing to rerank, e.g. when only the
    /// title field was searched.
    async fn rerank_content(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        content: &FieldRetrieval,
        options: &SearchOptions,
    ) -> Result<Option<RerankOutcome>, SearchError> {
        let ids: Vec<String> = content
            .content_candidate_ids()
            .map(str::to_string)
            .collect();
        let candidates = dedupe_candidates(self.store.get_chunks_batch(&ids).await?);
        if candidates.is_empty() {
            debug!("No content candidates to rerank");
            return Ok(None);
        }
        rerank_candidates(reranker, query, &candidates, &options.vector_aggregation)
            .await
            .map(Some)
    }

    /// Searches the index and returns up to `options.top_k` files, best first.
    ///
    /// Options are validated before any work; an empty or whitespace query
    /// returns no results. Requesting a rerank without a configured reranker
    /// logs a warning and returns the fused ranking.
    #[instrument(skip_all, fields(query_len = query.len(), top_k = options.top_k))]
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, SearchError> {
        options.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let weights = options.weights;
        let mode = SignalMode::from_weights(&weights);
        let query_embedding = if mode.uses_vector() {
            Some(self.embed_query(query).await?)
        } else {
            None
        };

        let mut title = FieldRetrieval::default();
        if weights.title > 0.0 {
            title = self
                .retrieve_field(query, query_embedding.as_deref(), Field::Title, options)
                .await?;
        }
        let mut content = FieldRetrieval::default();
        if weights.content > 0.0 {
            content = self
                .retrieve_field(query, query_embedding.as_deref(), Field::Content, options)
                .await?;
        }

        let mut ranked = combine_fields(&title.fused, &content.fused, weights.title, weights.content);

        let mut reranked_chunks = None;
        if options.rerank {
            match &self.reranker {
                Some(reranker) => {
                    if let Some(outcome) = self
                        .rerank_content(reranker.as_ref(), query, &content, options)
                        .await?
                    {
                        ranked = outcome.files;
                        reranked_chunks = Some(outcome.chunks);
                    }
                }
                None => warn!("Rerank requested but no reranker is configured"),
            }
        }

        let evidence = match &reranked_chunks {
            Some(chunks) => ChunkEvidence::Reranked(chunks),
            None => ChunkEvidence::Signals {
                retrieval: &content,
                mode,
            },
        };

        // Files removed since retrieval are skipped, so hydrate before cutting
        let mut results = Vec::with_capacity(options.top_k.min(ranked.len()));
        for file in ranked {
            if results.len() == options.top_k {
                break;
            }
            if let Some(result) = self.hydrate(file, &evidence).await? {
                results.push(result);
            }
        }
        debug!("Returning {} results", results.len());
        Ok(results)
    }

    /// Builds the result for one ranked file.
    ///
    /// Returns `None` if the file vanished from the store in the meantime.
    async fn hydrate(
        &self,
        file: ScoredId,
        evidence: &ChunkEvidence<'_>,
    ) -> Result<Option<SearchResult>, SearchError> {
        let chunks = self.store.chunks_for_file(&file.id).await?;
        if chunks.is_empty() {
            return Ok(None);
        }

        let title = chunks
            .iter()
            .find(|c| c.field() == Field::Title)
            .map(|c| c.content.clone())
            .unwrap_or_else(|| title_from_path(&file.id));
        let file_size = chunks.first().map(|c| c.size).unwrap_or(0);
        let content_chunks: Vec<&ChunkMetadata> = chunks
            .iter()
            .filter(|c| c.field() == Field::Content)
            .collect();

        let top_chunk = select_top_chunk(&file.id, &content_chunks, evidence);

        Ok(Some(SearchResult {
            title,
            score: file.score,
            top_chunk,
            chunk_count: content_chunks.len(),
            file_size,
            file_path: file.id,
        }))
    }
}

/// Best content hit of `path` in `hits`.
fn best_hit<'a>(hits: &'a [ScoredId], path: &str) -> Option<&'a ScoredId> {
    hits.iter()
        .filter(|hit| Field::Content.matches(&hit.id) && file_path_of(&hit.id) == path)
        .fold(None, |best: Option<&ScoredId>, hit| match best {
            Some(b) if b.score >= hit.score => Some(b),
            _ => Some(hit),
        })
}

fn rank_of(files: &[ScoredId], path: &str) -> Option<usize> {
    files.iter().position(|f| f.id == path)
}

/// Numeric position of a content chunk id, for the first-chunk fallback.
fn chunk_index(id: &str) -> usize {
    id.rsplit_once(CHUNK_ID_SEPARATOR)
        .and_then(|(_, index)| index.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Picks the content chunk shown with a result.
///
/// The chunk with the best score under the winning signal is preferred, then
/// the other signal's best, then the file's first chunk.
fn select_top_chunk(
    path: &str,
    content_chunks: &[&ChunkMetadata],
    evidence: &ChunkEvidence<'_>,
) -> Option<TopChunk> {
    let candidates: Vec<&[ScoredId]> = match evidence {
        ChunkEvidence::Reranked(chunks) => vec![*chunks],
        ChunkEvidence::Signals { retrieval, mode } => {
            let vector = retrieval.vector_hits.as_slice();
            let bm25 = retrieval.bm25_hits.as_slice();
            let vector_wins = match mode {
                SignalMode::VectorOnly => true,
                SignalMode::Bm25Only => false,
                SignalMode::Hybrid => {
                    match (
                        rank_of(&retrieval.vector_files, path),
                        rank_of(&retrieval.bm25_files, path),
                    ) {
                        (Some(v), Some(b)) => v <= b,
                        (Some(_), None) => true,
                        _ => false,
                    }
                }
            };
            if vector_wins {
                vec![vector, bm25]
            } else {
                vec![bm25, vector]
            }
        }
    };

    for hits in candidates {
        if let Some(hit) = best_hit(hits, path) {
            if let Some(chunk) = content_chunks.iter().find(|c| c.id == hit.id) {
                return Some(TopChunk {
                    content: chunk.content.clone(),
                    score: hit.score,
                    metadata: (*chunk).clone(),
                });
            }
        }
    }

    content_chunks
        .iter()
        .min_by_key(|c| chunk_index(&c.id))
        .map(|chunk| TopChunk {
            content: chunk.content.clone(),
            score: 0.0,
            metadata: (*chunk).clone(),
        })
}
