//! Retrieval end to end: hybrid ranking, modes, boundary behaviors, and
//! cross-project consent.

mod common;

use pretty_assertions::assert_eq;
use rag_index::indexer::IndexOptions;
use rag_index::search::{FusionStrategy, SearchMode, SearchRequest};
use rag_index::types::ConfidenceLabel;
use rag_index::Error;

fn options() -> IndexOptions {
    IndexOptions {
        recursive: true,
        ..Default::default()
    }
}

async fn indexed_auth_workspace() -> common::TestWorkspace {
    let ws = common::workspace();
    ws.write("auth.py", "def authenticate_user(token):\n  return token\n");
    ws.write("validate.py", "def validate(x):\n  return x\n");
    ws.write("session.py", "def logout():\n  pass\n");
    ws.core.index_project("p", ws.root(), options()).await.unwrap();
    ws.core.switch_project("p").unwrap();
    ws
}

#[tokio::test]
async fn hybrid_search_ranks_the_matching_unit_first() {
    let ws = indexed_auth_workspace().await;

    let mut request = SearchRequest::new("authenticate");
    request.mode = SearchMode::Hybrid;
    request.fusion = FusionStrategy::Weighted;
    request.alpha = 0.5;

    let results = ws.core.search(request).await.unwrap();
    assert!(!results.is_empty());
    assert!(results[0].content.contains("authenticate_user"));
    assert_eq!(results[0].confidence_label, ConfidenceLabel::Excellent);

    // Scores are sorted descending within [0, 1].
    for result in &results {
        assert!((0.0..=1.0).contains(&result.score_final));
    }
    for pair in results.windows(2) {
        assert!(pair[0].score_final >= pair[1].score_final);
    }
}

#[tokio::test]
async fn keyword_and_semantic_modes_both_find_it() {
    let ws = indexed_auth_workspace().await;

    let mut keyword = SearchRequest::new("authenticate");
    keyword.mode = SearchMode::Keyword;
    let results = ws.core.search(keyword).await.unwrap();
    assert!(results[0].content.contains("authenticate_user"));
    assert!(!results[0].matched_terms.is_empty());

    let mut semantic = SearchRequest::new("authenticate user token");
    semantic.mode = SearchMode::Semantic;
    let results = ws.core.search(semantic).await.unwrap();
    assert!(results[0].content.contains("authenticate_user"));
}

#[tokio::test]
async fn rrf_and_cascade_fusion_work() {
    let ws = indexed_auth_workspace().await;

    for fusion in [FusionStrategy::Rrf, FusionStrategy::Cascade] {
        let mut request = SearchRequest::new("authenticate");
        request.fusion = fusion;
        let results = ws.core.search(request).await.unwrap();
        assert!(results[0].content.contains("authenticate_user"));
    }
}

#[tokio::test]
async fn empty_query_returns_empty_without_embedding() {
    let ws = indexed_auth_workspace().await;
    let misses_before = ws.core.status().await.unwrap().cache.misses;

    let results = ws.core.search(SearchRequest::new("")).await.unwrap();
    assert!(results.is_empty());
    // No embedding work happened.
    assert_eq!(ws.core.status().await.unwrap().cache.misses, misses_before);
}

#[tokio::test]
async fn limit_zero_and_oversized_query() {
    let ws = indexed_auth_workspace().await;

    let mut request = SearchRequest::new("authenticate");
    request.limit = 0;
    assert!(ws.core.search(request).await.unwrap().is_empty());

    let request = SearchRequest::new("q".repeat(2000));
    assert!(matches!(
        ws.core.search(request).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn language_filter_restricts_results() {
    let ws = common::workspace();
    ws.write("a.py", "def shared_name():\n  return 1\n");
    ws.write("b.rs", "fn shared_name() -> i32 {\n    1\n}\n");
    ws.core.index_project("p", ws.root(), options()).await.unwrap();
    ws.core.switch_project("p").unwrap();

    let mut request = SearchRequest::new("shared_name");
    request.language = Some("rust".to_string());
    let results = ws.core.search(request).await.unwrap();
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(
            result.metadata.get("language").and_then(|v| v.as_str()),
            Some("rust")
        );
    }
}

#[tokio::test]
async fn find_similar_returns_nearest_content() {
    let ws = indexed_auth_workspace().await;
    let results = ws
        .core
        .find_similar("def authenticate_user(token)", Some("p"), 2)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results[0].content.contains("authenticate_user"));
}

#[tokio::test]
async fn repeated_search_records_usage() {
    let ws = indexed_auth_workspace().await;
    for _ in 0..3 {
        ws.core
            .search(SearchRequest::new("authenticate"))
            .await
            .unwrap();
    }
    let status = ws.core.status().await.unwrap();
    assert!(status.usage_pending > 0);

    // Maintenance flushes the buffer into payload access counts.
    ws.core.run_maintenance().await.unwrap();
    assert_eq!(ws.core.status().await.unwrap().usage_pending, 0);
}

#[tokio::test]
async fn cross_project_search_honors_consent() {
    let ws = common::workspace();
    ws.write("p1/auth.py", "def auth_p1(token):\n  return token\n");
    ws.write("p2/auth.py", "def auth_p2(token):\n  return token\n");
    ws.write("p3/auth.py", "def auth_p3(token):\n  return token\n");
    ws.core
        .index_project("p1", &ws.root().join("p1"), options())
        .await
        .unwrap();
    ws.core
        .index_project("p2", &ws.root().join("p2"), options())
        .await
        .unwrap();
    ws.core
        .index_project("p3", &ws.root().join("p3"), options())
        .await
        .unwrap();

    ws.core.switch_project("p1").unwrap();
    ws.core.opt_in("p2").unwrap();

    let mut request = SearchRequest::new("auth token");
    request.limit = 10;
    let results = ws.core.search_across_opted_in(request).await.unwrap();

    let projects: Vec<&str> = results
        .iter()
        .filter_map(|r| r.metadata.get("project").and_then(|v| v.as_str()))
        .collect();
    assert!(projects.contains(&"p1"));
    assert!(projects.contains(&"p2"));
    assert!(!projects.contains(&"p3"));

    // The active project's hit outranks the opted-in one.
    assert_eq!(
        results[0].metadata.get("project").and_then(|v| v.as_str()),
        Some("p1")
    );

    // Opting out removes the project from subsequent sweeps.
    assert!(ws.core.opt_out("p2"));
    let mut request = SearchRequest::new("auth token");
    request.limit = 10;
    let results = ws.core.search_across_opted_in(request).await.unwrap();
    let projects: Vec<&str> = results
        .iter()
        .filter_map(|r| r.metadata.get("project").and_then(|v| v.as_str()))
        .collect();
    assert!(!projects.contains(&"p2"));
}

#[tokio::test]
async fn gate_short_circuits_low_value_queries() {
    let mut config = rag_index::config::Config::default();
    config.retrieval_gate.enabled = true;
    config.retrieval_gate.threshold = 0.4;
    let ws = common::workspace_with(config);
    ws.write("a.py", "def something():\n  pass\n");
    ws.core.index_project("p", ws.root(), options()).await.unwrap();

    let misses_before = ws.core.status().await.unwrap().cache.misses;
    let results = ws.core.search(SearchRequest::new(":) !! 12")).await.unwrap();
    assert!(results.is_empty());
    // Gated before embedding: the cache saw no new text.
    let status = ws.core.status().await.unwrap();
    assert_eq!(status.cache.misses, misses_before);
    assert!(status.gated_queries >= 1);
}
