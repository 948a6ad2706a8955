//! Memory CRUD surface: store, get, update, delete, listing, and the
//! declared boundary behaviors.

mod common;

use common::workspace_with;
use pretty_assertions::assert_eq;
use rag_index::config::Config;
use rag_index::server::{ListRequest, StoreMemoryRequest, UpdateMemoryRequest};
use rag_index::Error;

fn store_request(content: &str, importance: f32) -> StoreMemoryRequest {
    StoreMemoryRequest {
        content: content.to_string(),
        category: "preference".to_string(),
        context_level: "user".to_string(),
        scope: "global".to_string(),
        project: None,
        tags: vec!["style".to_string()],
        importance,
        metadata: Default::default(),
    }
}

#[tokio::test]
async fn store_get_update_delete_roundtrip() {
    let ws = common::workspace();

    let id = ws
        .core
        .store(store_request("use tabs, not spaces", 0.9))
        .await
        .unwrap();

    let loaded = ws.core.get(&id).await.unwrap();
    assert_eq!(loaded.content, "use tabs, not spaces");
    assert_eq!(loaded.importance, 0.9);
    assert_eq!(loaded.tags, vec!["style"]);

    let updated = ws
        .core
        .update(
            &id,
            UpdateMemoryRequest {
                importance: Some(0.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.importance, 0.5);
    assert_eq!(ws.core.get(&id).await.unwrap().importance, 0.5);

    ws.core.delete(&id).await.unwrap();
    assert!(matches!(
        ws.core.get(&id).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn importance_bounds_are_enforced() {
    let ws = common::workspace();

    assert!(ws.core.store(store_request("zero", 0.0)).await.is_ok());
    assert!(ws.core.store(store_request("one", 1.0)).await.is_ok());

    let over = ws.core.store(store_request("over", 1.5)).await;
    assert!(matches!(over, Err(Error::Validation { .. })));
    let under = ws.core.store(store_request("under", -0.1)).await;
    assert!(matches!(under, Err(Error::Validation { .. })));
}

#[tokio::test]
async fn content_size_boundary() {
    let ws = common::workspace();

    let at_limit = "a".repeat(50_000);
    assert!(ws.core.store(store_request(&at_limit, 0.5)).await.is_ok());

    let over = "a".repeat(50_001);
    assert!(matches!(
        ws.core.store(store_request(&over, 0.5)).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn content_update_reembeds() {
    let ws = common::workspace();
    let id = ws.core.store(store_request("original text", 0.5)).await.unwrap();
    let before = ws.core.get(&id).await.unwrap().embedding;

    let updated = ws
        .core
        .update(
            &id,
            UpdateMemoryRequest {
                content: Some("completely different content".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.content, "completely different content");

    let after = ws.core.get(&id).await.unwrap().embedding;
    assert_ne!(before, after);
}

#[tokio::test]
async fn list_filters_and_pagination() {
    let ws = common::workspace();
    for i in 0..5 {
        ws.core
            .store(store_request(&format!("memory number {i}"), 0.5))
            .await
            .unwrap();
    }

    let all = ws.core.list(ListRequest::default()).await.unwrap();
    assert_eq!(all.len(), 5);

    let page = ws
        .core
        .list(ListRequest {
            limit: 2,
            offset: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);

    // Offset past the total is an empty page, not an error.
    let past = ws
        .core
        .list(ListRequest {
            offset: 99,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(past.is_empty());

    let none = ws
        .core
        .list(ListRequest {
            category: Some("workflow".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(none.is_empty());

    let bad = ws
        .core
        .list(ListRequest {
            category: Some("not-a-category".to_string()),
            ..Default::default()
        })
        .await;
    assert!(matches!(bad, Err(Error::Validation { .. })));
}

#[tokio::test]
async fn bulk_delete_counts() {
    let ws = common::workspace();
    let a = ws.core.store(store_request("first", 0.5)).await.unwrap();
    let b = ws.core.store(store_request("second", 0.5)).await.unwrap();

    let deleted = ws
        .core
        .bulk_delete(&[a.clone(), b.clone(), "missing-id".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert!(ws.core.get(&a).await.is_err());
    assert!(ws.core.get(&b).await.is_err());
}

#[tokio::test]
async fn read_only_refuses_writes() {
    let ws = workspace_with(Config {
        read_only: true,
        ..Default::default()
    });

    let result = ws.core.store(store_request("nope", 0.5)).await;
    assert!(matches!(result, Err(Error::ReadOnly)));
    assert_eq!(Error::ReadOnly.kind(), "read_only");
}

#[tokio::test]
async fn project_scope_requires_project() {
    let ws = common::workspace();
    let mut request = store_request("scoped", 0.5);
    request.scope = "project".to_string();
    assert!(matches!(
        ws.core.store(request).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn unknown_enum_values_are_validation_errors() {
    let ws = common::workspace();
    let mut request = store_request("x", 0.5);
    request.category = "vibes".to_string();
    assert!(matches!(
        ws.core.store(request).await,
        Err(Error::Validation { .. })
    ));
}
