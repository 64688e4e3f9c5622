//! Tenant isolation and namespace resolution

mod common;

use common::{ids, memory_service, tantivy_service};
use std::sync::Arc;
use tenant_search::backend::InMemoryBackend;
use tenant_search::models::{Document, Pager};
use tenant_search::search::{BackendKind, ResultSet, SearchConfig, SearchService};
use tenant_search::SearchError;

async fn assert_isolated(service: &SearchService) {
    let shared_id = Document::new("user", "u1");
    service
        .index(Some("t1"), &shared_id.clone().with_field("name", "Alice"))
        .await
        .unwrap();
    service
        .index(Some("t2"), &shared_id.clone().with_field("name", "Bob"))
        .await
        .unwrap();
    service
        .index(Some("t1"), &Document::new("user", "u2").with_field("name", "Alicia"))
        .await
        .unwrap();
    service.refresh(Some("t1")).await.unwrap();
    service.refresh(Some("t2")).await.unwrap();

    let from_t1: Document = service.find_by_id(Some("t1"), "u1").await.unwrap().unwrap();
    let from_t2: Document = service.find_by_id(Some("t2"), "u1").await.unwrap().unwrap();
    assert_eq!(from_t1.field("name").and_then(|v| v.as_str()), Some("Alice"));
    assert_eq!(from_t2.field("name").and_then(|v| v.as_str()), Some("Bob"));

    let mut pager = Pager::default();
    let t2_alices: ResultSet<Document> = service
        .find_prefix(Some("t2"), None, "name", "ali", &mut pager)
        .await
        .unwrap();
    assert!(t2_alices.is_empty());

    assert_eq!(service.get_count(Some("t1"), None, None).await.unwrap(), Some(2));
    assert_eq!(service.get_count(Some("t2"), None, None).await.unwrap(), Some(1));
    assert_eq!(service.get_count(Some("t3"), None, None).await.unwrap(), Some(0));

    // The default tenant is a tenant like any other
    let none: Option<Document> = service.find_by_id(None, "u1").await.unwrap();
    assert!(none.is_none());

    service.clear(Some("t1")).await.unwrap();
    assert_eq!(service.get_count(Some("t1"), None, None).await.unwrap(), Some(0));
    assert_eq!(service.get_count(Some("t2"), None, None).await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_in_memory_tenants_are_isolated() {
    let service = memory_service();
    assert_isolated(&service).await;
}

#[tokio::test]
async fn test_tantivy_tenants_are_isolated() {
    let (service, dir) = tantivy_service();
    assert_isolated(&service).await;

    assert!(dir.path().join("tenant-t1").join("meta.json").exists());
    assert!(dir.path().join("tenant-t2").join("meta.json").exists());
    // Reads never create namespaces
    assert!(!dir.path().join("tenant-t3").exists());
}

#[tokio::test]
async fn test_default_tenant_resolution() {
    let service = memory_service();
    service
        .index(None, &Document::new("user", "u1"))
        .await
        .unwrap();

    let explicit: Option<Document> = service.find_by_id(Some("main"), "u1").await.unwrap();
    assert!(explicit.is_some());
    assert_eq!(service.namespace(None).unwrap(), service.namespace(Some("main")).unwrap());
    assert_eq!(service.namespace(Some("t1")).unwrap().as_str(), "tenant-t1");
}

#[tokio::test]
async fn test_missing_default_tenant_is_fatal() {
    let config = SearchConfig {
        backend: BackendKind::InMemory,
        default_app_id: None,
        ..Default::default()
    };
    let service = SearchService::with_backend(config, Arc::new(InMemoryBackend::new())).unwrap();

    let result = service.index(None, &Document::new("user", "u1")).await;
    assert!(matches!(result, Err(SearchError::Configuration(_))));

    // Explicit tenants still work
    service
        .index(Some("t1"), &Document::new("user", "u1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unsafe_app_ids_are_rejected() {
    let service = memory_service();

    for app_id in ["", "T1", "a b", "../etc", "a.b", "-lead", "tenant/x"] {
        let result = service.index(Some(app_id), &Document::new("user", "u1")).await;
        assert!(
            matches!(result, Err(SearchError::Configuration(_))),
            "app id {:?} should be rejected",
            app_id
        );
    }
}

#[tokio::test]
async fn test_invalid_default_app_id_fails_construction() {
    let config = SearchConfig {
        backend: BackendKind::InMemory,
        default_app_id: Some("Not Valid".to_string()),
        ..Default::default()
    };
    let result = SearchService::with_backend(config, Arc::new(InMemoryBackend::new()));
    assert!(matches!(result, Err(SearchError::Configuration(_))));
}

#[tokio::test]
async fn test_same_ids_across_tenants_stay_distinct_in_results() {
    let service = memory_service();
    for app in ["a", "b"] {
        for id in ["x", "y"] {
            service
                .index(Some(app), &Document::new("item", id).with_field("owner", app))
                .await
                .unwrap();
        }
    }

    let mut pager = Pager::default();
    let results: ResultSet<Document> = service
        .find_query(Some("b"), Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&results), vec!["x", "y"]);
    assert!(results
        .items
        .iter()
        .all(|doc| doc.field("owner").and_then(|v| v.as_str()) == Some("b")));
}
