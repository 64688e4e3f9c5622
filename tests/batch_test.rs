//! Batched indexing and per-object failure reporting

mod common;

use async_trait::async_trait;
use common::{memory_service_with, tantivy_service};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tenant_search::backend::{
    Candidates, HitSort, IndexStats, InMemoryBackend, RecordFailure, SearchBackend,
};
use tenant_search::models::{Document, ObjectKey};
use tenant_search::search::query::Clause;
use tenant_search::search::{
    BackendKind, IndexRecord, Namespace, SearchConfig, SearchService,
};
use tenant_search::{SearchError, SearchResult};

/// Rejects records whose id starts with `bad`, fails whole chunks holding `boom`
struct SelectiveBackend {
    inner: InMemoryBackend,
    upsert_calls: AtomicUsize,
}

impl SelectiveBackend {
    fn new() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            upsert_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SearchBackend for SelectiveBackend {
    fn name(&self) -> &'static str {
        "selective"
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        records: Vec<IndexRecord>,
    ) -> SearchResult<Vec<RecordFailure>> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if records.iter().any(|r| r.key.id == "boom") {
            return Err(SearchError::BackendUnavailable("writer crashed".to_string()));
        }

        let (bad, good): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.key.id.starts_with("bad"));
        let mut failures = self.inner.upsert(namespace, good).await?;
        failures.extend(bad.into_iter().map(|r| RecordFailure {
            key: r.key,
            reason: "rejected by engine".to_string(),
        }));
        Ok(failures)
    }

    async fn delete(
        &self,
        namespace: &Namespace,
        keys: &[ObjectKey],
    ) -> SearchResult<Vec<RecordFailure>> {
        self.inner.delete(namespace, keys).await
    }

    async fn search(
        &self,
        namespace: &Namespace,
        clause: &Clause,
        sort: HitSort,
        limit: usize,
    ) -> SearchResult<Candidates> {
        self.inner.search(namespace, clause, sort, limit).await
    }

    async fn count(&self, namespace: &Namespace, clause: &Clause) -> SearchResult<Option<u64>> {
        self.inner.count(namespace, clause).await
    }

    async fn refresh(&self, namespace: &Namespace) -> SearchResult<()> {
        self.inner.refresh(namespace).await
    }

    async fn clear(&self, namespace: &Namespace) -> SearchResult<()> {
        self.inner.clear(namespace).await
    }

    async fn stats(&self, namespace: &Namespace) -> SearchResult<IndexStats> {
        self.inner.stats(namespace).await
    }
}

fn selective_service(batch_size: usize) -> (SearchService, Arc<SelectiveBackend>) {
    let backend = Arc::new(SelectiveBackend::new());
    let config = SearchConfig {
        backend: BackendKind::InMemory,
        default_app_id: Some("main".to_string()),
        batch_size,
        batch_concurrency: 2,
        ..Default::default()
    };
    let service = SearchService::with_backend(config, backend.clone()).unwrap();
    (service, backend)
}

fn items(ids: &[&str]) -> Vec<Document> {
    ids.iter()
        .map(|id| Document::new("item", *id).with_field("name", format!("Item {}", id)))
        .collect()
}

#[tokio::test]
async fn test_batches_are_chunked_transparently() {
    let service = memory_service_with(SearchConfig {
        batch_size: 3,
        batch_concurrency: 2,
        ..Default::default()
    });

    let docs: Vec<Document> = (0..10)
        .map(|i| Document::new("item", format!("i{:02}", i)))
        .collect();
    let report = service.index_all(None, &docs).await.unwrap();
    assert_eq!(report.requested, 10);
    assert_eq!(report.succeeded, 10);
    assert!(report.is_complete());
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(10));

    let report = service.unindex_all(None, &docs[..4]).await.unwrap();
    assert_eq!(report.succeeded, 4);
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(6));
}

#[tokio::test]
async fn test_partial_failures_are_reported_per_object() {
    let (service, backend) = selective_service(2);

    let docs = items(&["a", "bad-1", "b", "c", "bad-2"]);
    let report = service.index_all(None, &docs).await.unwrap();

    assert_eq!(report.requested, 5);
    assert_eq!(report.succeeded, 3);
    assert_eq!(
        report.failed_keys(),
        vec![ObjectKey::new("item", "bad-1"), ObjectKey::new("item", "bad-2")]
    );
    assert!(report.failures.iter().all(|f| f.reason == "rejected by engine"));
    assert_eq!(backend.upsert_calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_failed_chunk_fails_only_its_objects() {
    let (service, _backend) = selective_service(2);

    let docs = items(&["a", "b", "boom", "c", "d"]);
    let report = service.index_all(None, &docs).await.unwrap();

    // "boom" shares its chunk with "c"
    assert_eq!(report.succeeded, 3);
    assert_eq!(
        report.failed_keys(),
        vec![ObjectKey::new("item", "boom"), ObjectKey::new("item", "c")]
    );
    assert!(report.failures[0].reason.contains("writer crashed"));
}

#[tokio::test]
async fn test_invalid_objects_are_rejected_without_failing_the_batch() {
    let (service, _backend) = selective_service(10);

    let docs = vec![
        Document::new("item", "a"),
        Document::new("item", ""),
        Document::new("bad type", "b"),
        Document::new("item", "c").with_location(120.0, 0.0),
        Document::new("item", "d"),
    ];
    let report = service.index_all(None, &docs).await.unwrap();

    assert_eq!(report.requested, 5);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures.len(), 3);
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(2));

    // Single operations surface the same problems as errors
    let single = service.index(None, &Document::new("item", "  ")).await;
    assert!(matches!(single, Err(SearchError::Validation(_))));
    let failing = service.index(None, &Document::new("item", "bad-x")).await;
    assert!(matches!(failing, Err(SearchError::Backend(_))));
    let unavailable = service.index(None, &Document::new("item", "boom")).await;
    assert!(matches!(unavailable, Err(ref e) if e.is_retryable()));
}

#[tokio::test]
async fn test_unindex_all_reports_invalid_keys() {
    let (service, _backend) = selective_service(2);
    service.index_all(None, &items(&["a", "b"])).await.unwrap();

    let targets = vec![
        Document::new("item", "a"),
        Document::new("item", ""),
        Document::new("item", "missing"),
    ];
    let report = service.unindex_all(None, &targets).await.unwrap();
    assert_eq!(report.requested, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_tantivy_batch_round_trip() {
    let (service, _dir) = tantivy_service();

    let docs: Vec<Document> = (0..250)
        .map(|i| Document::new("item", format!("i{:03}", i)).with_field("n", i))
        .collect();
    let report = service.index_all(None, &docs).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded, 250);

    service.refresh(None).await.unwrap();
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(250));

    let report = service.unindex_all(None, &docs[..100]).await.unwrap();
    assert!(report.is_complete());
    service.refresh(None).await.unwrap();
    assert_eq!(service.get_count(None, Some("item"), None).await.unwrap(), Some(150));
}
