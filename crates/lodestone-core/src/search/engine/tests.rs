//! Tests for the HybridSearchEngine.

use super::*;
use crate::search::types::{FusionWeights, SearchOptions, SourceDocument};
use crate::storage::InMemoryDocumentStore;
use crate::test_utils::{init_tracing, MockProvider, MockReranker};

async fn engine_with(
    store: Arc<InMemoryDocumentStore>,
    provider: Arc<MockProvider>,
) -> HybridSearchEngine {
    HybridSearchEngine::open(store, provider, ChunkerConfig::default())
        .await
        .unwrap()
}

async fn scenario_engine() -> (HybridSearchEngine, Arc<InMemoryDocumentStore>, Arc<MockProvider>) {
    init_tracing();
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(MockProvider::default());
    let engine = engine_with(store.clone(), provider.clone()).await;

    for (path, text) in [
        ("etymology.md", "Automobile etymology: Greek and Latin roots"),
        ("transport.md", "Cars and trucks share the road"),
        ("baking.md", "Baking bread needs flour"),
    ] {
        engine
            .index_file(&SourceDocument::new(path, text, 1_000))
            .await
            .unwrap();
    }
    (engine, store, provider)
}

fn paths(results: &[crate::search::types::SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.file_path.as_str()).collect()
}

#[tokio::test]
async fn test_hybrid_ranks_keyword_then_semantic_then_unrelated() {
    let (engine, _, _) = scenario_engine().await;

    let results = engine
        .search("automobile", &SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(
        paths(&results),
        vec!["etymology.md", "transport.md", "baking.md"]
    );
    for result in &results {
        assert!((0.0..=1.0).contains(&result.score), "score {}", result.score);
    }
    assert!(results[0].score > results[1].score);
    assert!(results[1].score > results[2].score);

    let top = &results[0];
    assert_eq!(top.title, "etymology");
    assert_eq!(top.chunk_count, 1);
    assert_eq!(
        top.file_size,
        "Automobile etymology: Greek and Latin roots".len() as u64
    );
    let chunk = top.top_chunk.as_ref().unwrap();
    assert!(chunk.content.contains("Automobile"));
    assert_eq!(chunk.metadata.id, "etymology.md#0");
}

#[tokio::test]
async fn test_bm25_only_returns_keyword_matches() {
    let (engine, _, provider) = scenario_engine().await;
    let calls_before = provider
        .embed_calls
        .load(std::sync::atomic::Ordering::SeqCst);

    let options = SearchOptions {
        weights: FusionWeights {
            embedding: 0.0,
            bm25: 1.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let results = engine.search("automobile", &options).await.unwrap();

    assert_eq!(paths(&results), vec!["etymology.md"]);
    assert!(results[0].score > 0.0);
    // No vector signal, so the query is never embedded
    assert_eq!(
        provider
            .embed_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        calls_before
    );
}

#[tokio::test]
async fn test_vector_only_passes_raw_similarity_through() {
    let (engine, _, _) = scenario_engine().await;
    let options = SearchOptions {
        weights: FusionWeights {
            embedding: 1.0,
            bm25: 0.0,
            title: 0.0,
            content: 1.0,
        },
        ..Default::default()
    };

    let results = engine.search("trucks", &options).await.unwrap();
    assert_eq!(results[0].file_path, "transport.md");
    // Single chunk, single field: the score is the cosine similarity itself
    let expected = crate::search::vector::cosine_similarity(
        &MockProvider::default().embed_one("trucks"),
        &MockProvider::default().embed_one("Cars and trucks share the road"),
    );
    assert!((results[0].score - expected).abs() < 1e-5);
}

#[tokio::test]
async fn test_zero_weights_rejected_before_work() {
    let (engine, _, provider) = scenario_engine().await;
    let calls_before = provider
        .embed_calls
        .load(std::sync::atomic::Ordering::SeqCst);

    let options = SearchOptions {
        weights: FusionWeights {
            embedding: 0.0,
            bm25: 0.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let err = engine.search("automobile", &options).await.unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery(_)));

    let fields_zero = SearchOptions {
        weights: FusionWeights {
            title: 0.0,
            content: 0.0,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(matches!(
        engine.search("automobile", &fields_zero).await,
        Err(SearchError::InvalidQuery(_))
    ));
    assert_eq!(
        provider
            .embed_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        calls_before
    );
}

#[tokio::test]
async fn test_empty_query_returns_nothing() {
    let (engine, _, _) = scenario_engine().await;
    assert!(engine
        .search("   ", &SearchOptions::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_search_on_empty_index() {
    let engine = engine_with(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(MockProvider::default()),
    )
    .await;
    let results = engine
        .search("anything", &SearchOptions::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_top_k_truncates() {
    let (engine, _, _) = scenario_engine().await;
    let options = SearchOptions {
        top_k: 2,
        ..Default::default()
    };
    let results = engine.search("automobile", &options).await.unwrap();
    assert_eq!(paths(&results), vec!["etymology.md", "transport.md"]);
}

#[tokio::test]
async fn test_top_chunk_is_best_matching_chunk() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let provider = Arc::new(MockProvider::default());
    let engine = HybridSearchEngine::open(store, provider, ChunkerConfig::new(8, 0))
        .await
        .unwrap();

    let text = "Grammar of Latin words\n\n\
                Bread recipes from the warm oven\n\n\
                Automobile engine repair";
    let chunks = engine
        .index_file(&SourceDocument::new("notes.md", text, 5))
        .await
        .unwrap();
    assert!(chunks >= 2);

    let results = engine
        .search("automobile", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_count, chunks);
    let top = results[0].top_chunk.as_ref().unwrap();
    assert!(top.content.contains("Automobile engine repair"));
}

#[tokio::test]
async fn test_reindex_replaces_previous_chunks() {
    let (engine, store, _) = scenario_engine().await;

    engine
        .index_file(&SourceDocument::new(
            "etymology.md",
            "Sourdough starter and flour",
            2_000,
        ))
        .await
        .unwrap();

    let options = SearchOptions {
        weights: FusionWeights {
            embedding: 0.0,
            bm25: 1.0,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(engine.search("automobile", &options).await.unwrap().is_empty());
    let flour = engine.search("sourdough", &options).await.unwrap();
    assert_eq!(paths(&flour), vec!["etymology.md"]);

    // Title row plus one content chunk, nothing left over
    assert_eq!(store.chunks_for_file("etymology.md").await.unwrap().len(), 2);
    let stats = engine.get_stats().await.unwrap();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.total_chunks, 3);
}

#[tokio::test]
async fn test_delete_file_removes_everything() {
    let (engine, store, _) = scenario_engine().await;

    assert!(engine.delete_file("transport.md").await.unwrap());
    assert!(store.chunks_for_file("transport.md").await.unwrap().is_empty());
    assert!(engine.file_record("transport.md").await.unwrap().is_none());
    assert_eq!(engine.vectors.len(crate::search::types::Field::Content), 2);

    let results = engine
        .search("automobile", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!paths(&results).contains(&"transport.md"));

    // Unknown path is a no-op
    assert!(!engine.delete_file("missing.md").await.unwrap());
    assert_eq!(engine.get_stats().await.unwrap().total_files, 2);
}

#[tokio::test]
async fn test_rename_moves_rows() {
    let (engine, store, _) = scenario_engine().await;

    let doc = SourceDocument::new("cooking/baking.md", "Baking bread needs flour", 3_000);
    engine.rename_file("baking.md", &doc).await.unwrap();

    assert!(store.chunks_for_file("baking.md").await.unwrap().is_empty());
    assert!(engine.file_record("baking.md").await.unwrap().is_none());
    assert!(engine
        .file_record("cooking/baking.md")
        .await
        .unwrap()
        .is_some());

    let results = engine.search("bread", &SearchOptions::default()).await.unwrap();
    assert_eq!(results[0].file_path, "cooking/baking.md");
    assert_eq!(engine.get_stats().await.unwrap().total_files, 3);
}

#[tokio::test]
async fn test_provider_failure_keeps_previous_state() {
    let (engine, store, provider) = scenario_engine().await;
    let rows_before = store.chunks_for_file("etymology.md").await.unwrap();

    provider.fail_all(true);
    let err = engine
        .index_file(&SourceDocument::new("etymology.md", "Completely new text", 9_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::EmbeddingError(_)));

    assert_eq!(store.chunks_for_file("etymology.md").await.unwrap(), rows_before);
    let record = engine.file_record("etymology.md").await.unwrap().unwrap();
    assert_eq!(record.failure_count, 1);
    assert!(record.last_error.is_some());
    assert_eq!(record.chunk_count, 1);
    assert!(engine
        .file_needs_update("etymology.md", record.mtime, record.size)
        .await
        .unwrap());

    provider.fail_all(false);
    let options = SearchOptions {
        weights: FusionWeights {
            embedding: 0.0,
            bm25: 1.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let results = engine.search("automobile", &options).await.unwrap();
    assert_eq!(paths(&results), vec!["etymology.md"]);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_partial_state() {
    let (engine, store, _) = scenario_engine().await;
    let stats_before = engine.get_stats().await.unwrap();

    store.fail_writes(true);
    let result = engine
        .index_file(&SourceDocument::new("new.md", "Snow storm forecast", 1))
        .await;
    assert!(matches!(result, Err(SearchError::StorageError(_))));
    assert!(engine.delete_file("baking.md").await.is_err());
    store.fail_writes(false);

    assert_eq!(engine.get_stats().await.unwrap(), stats_before);
    assert!(store.chunks_for_file("new.md").await.unwrap().is_empty());
    assert_eq!(engine.vectors.len(crate::search::types::Field::Title), 3);
    let results = engine.search("snow", &SearchOptions::default()).await.unwrap();
    assert!(!paths(&results).contains(&"new.md"));
    let results = engine.search("bread", &SearchOptions::default()).await.unwrap();
    assert_eq!(results[0].file_path, "baking.md");
}

#[tokio::test]
async fn test_record_failure_counts_per_version() {
    let engine = engine_with(
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(MockProvider::default()),
    )
    .await;

    assert_eq!(engine.record_failure("a.md", 1, 10, "boom").await.unwrap(), 1);
    assert_eq!(engine.record_failure("a.md", 1, 10, "boom").await.unwrap(), 2);
    // A changed file starts over
    assert_eq!(engine.record_failure("a.md", 2, 10, "boom").await.unwrap(), 1);

    let record = engine.file_record("a.md").await.unwrap().unwrap();
    assert_eq!(record.indexed_at, 0);
    assert_eq!(engine.get_stats().await.unwrap().total_files, 0);
}

#[tokio::test]
async fn test_file_needs_update() {
    let (engine, _, _) = scenario_engine().await;
    let record = engine.file_record("baking.md").await.unwrap().unwrap();

    assert!(!engine
        .file_needs_update("baking.md", record.mtime, record.size)
        .await
        .unwrap());
    assert!(engine
        .file_needs_update("baking.md", record.mtime + 1, record.size)
        .await
        .unwrap());
    assert!(engine.file_needs_update("unknown.md", 0, 0).await.unwrap());
}

#[tokio::test]
async fn test_reopen_with_other_dimension_fails() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let engine = engine_with(store.clone(), Arc::new(MockProvider::new(32))).await;
    engine
        .index_file(&SourceDocument::new("a.md", "rain", 1))
        .await
        .unwrap();

    let reopened =
        HybridSearchEngine::open(store, Arc::new(MockProvider::new(64)), ChunkerConfig::default())
            .await;
    assert!(matches!(
        reopened,
        Err(SearchError::DimensionMismatch {
            expected: 64,
            actual: 32
        })
    ));
}

#[tokio::test]
async fn test_reopen_restores_index() {
    let (engine, store, provider) = scenario_engine().await;
    drop(engine);

    let reopened = engine_with(store, provider).await;
    let results = reopened
        .search("automobile", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(
        paths(&results),
        vec!["etymology.md", "transport.md", "baking.md"]
    );
}

#[tokio::test]
async fn test_rerank_pass_orders_by_reranker() {
    let (engine, _, _) = scenario_engine().await;
    let reranker = Arc::new(MockReranker::default());
    let engine = engine.with_reranker(reranker.clone());
    assert!(engine.has_reranker());

    let options = SearchOptions {
        rerank: true,
        ..Default::default()
    };
    let results = engine.search("automobile", &options).await.unwrap();

    assert_eq!(reranker.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(results[0].file_path, "etymology.md");
    assert_eq!(results[0].score, 1.0);
    for result in &results[1..] {
        assert_eq!(result.score, 0.0);
    }
    assert_eq!(
        results[0].top_chunk.as_ref().unwrap().metadata.id,
        "etymology.md#0"
    );
}

#[tokio::test]
async fn test_rerank_scores_content_not_titles() {
    init_tracing();
    let store = Arc::new(InMemoryDocumentStore::new());
    let engine = engine_with(store, Arc::new(MockProvider::default()))
        .await
        .with_reranker(Arc::new(MockReranker::default()));

    // The first file matches the query by name only
    for (path, text) in [
        ("a-soup.md", "Carrots and onions simmer slowly"),
        ("recipes.md", "Soup with lentils and carrots"),
    ] {
        engine
            .index_file(&SourceDocument::new(path, text, 1_000))
            .await
            .unwrap();
    }

    let options = SearchOptions {
        rerank: true,
        ..Default::default()
    };
    let results = engine.search("soup", &options).await.unwrap();
    assert_eq!(paths(&results), vec!["recipes.md", "a-soup.md"]);
    assert_eq!(results[0].score, 1.0);
    assert_eq!(results[1].score, 0.0);
}

#[tokio::test]
async fn test_rerank_with_title_field_only_keeps_fused_ranking() {
    let (engine, _, _) = scenario_engine().await;
    let reranker = Arc::new(MockReranker::default());
    let engine = engine.with_reranker(reranker.clone());

    let title_only = SearchOptions {
        weights: FusionWeights {
            title: 1.0,
            content: 0.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let reranked = engine
        .search(
            "etymology",
            &SearchOptions {
                rerank: true,
                ..title_only.clone()
            },
        )
        .await
        .unwrap();
    let fused = engine.search("etymology", &title_only).await.unwrap();

    assert_eq!(reranker.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(reranked, fused);
    assert_eq!(reranked[0].file_path, "etymology.md");
}

#[tokio::test]
async fn test_vanished_files_do_not_shrink_results() {
    use crate::storage::{DocumentStore, WriteBatch};

    let (engine, store, _) = scenario_engine().await;
    let options = SearchOptions {
        top_k: 2,
        ..Default::default()
    };
    let before = engine.search("automobile", &options).await.unwrap();
    assert_eq!(paths(&before), vec!["etymology.md", "transport.md"]);

    // Remove the best file's rows behind the engine's back
    let mut batch = WriteBatch::new();
    batch.delete_chunk("etymology.md#0");
    batch.delete_chunk("etymology.md#title");
    store.apply(batch).await.unwrap();

    let after = engine.search("automobile", &options).await.unwrap();
    assert_eq!(paths(&after), vec!["transport.md", "baking.md"]);
}

#[tokio::test]
async fn test_rerank_without_reranker_falls_back() {
    let (engine, _, _) = scenario_engine().await;
    let options = SearchOptions {
        rerank: true,
        ..Default::default()
    };
    let reranked = engine.search("automobile", &options).await.unwrap();
    let fused = engine
        .search("automobile", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(reranked, fused);
}

#[tokio::test]
async fn test_clear_all() {
    let (engine, _, _) = scenario_engine().await;
    engine.clear_all().await.unwrap();

    assert_eq!(engine.get_stats().await.unwrap().total_files, 0);
    assert!(engine.vectors.is_empty());
    assert!(engine
        .search("automobile", &SearchOptions::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_title_field_matches_file_name() {
    let (engine, _, _) = scenario_engine().await;
    let options = SearchOptions {
        weights: FusionWeights {
            embedding: 0.0,
            bm25: 1.0,
            title: 1.0,
            content: 0.0,
        },
        ..Default::default()
    };
    let results = engine.search("transport", &options).await.unwrap();
    assert_eq!(paths(&results), vec!["transport.md"]);
    // Content was not retrieved, so the first chunk stands in
    assert_eq!(results[0].top_chunk.as_ref().unwrap().score, 0.0);
}
