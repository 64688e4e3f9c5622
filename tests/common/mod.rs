//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;
use tenant_search::backend::{Clock, InMemoryBackend};
use tenant_search::models::{Document, Pager};
use tenant_search::search::{BackendKind, ResultSet, SearchConfig, SearchQuery, SearchService};

pub const DEFAULT_APP: &str = "main";

/// Tantivy-backed service with its index in a fresh temporary directory.
///
/// The directory is removed when the returned `TempDir` drops, so keep it
/// alive for the duration of the test.
pub fn tantivy_service() -> (SearchService, TempDir) {
    tantivy_service_with(SearchConfig::default())
}

/// Tantivy-backed service built from `config` with the index location and
/// default tenant forced
pub fn tantivy_service_with(config: SearchConfig) -> (SearchService, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = SearchConfig {
        backend: BackendKind::Tantivy,
        index_path: Some(temp_dir.path().to_path_buf()),
        writer_heap_size: 20_000_000,
        realtime_indexing: true,
        default_app_id: Some(DEFAULT_APP.to_string()),
        ..config
    };

    (SearchService::new(config).unwrap(), temp_dir)
}

/// In-memory service with the default tenant set
pub fn memory_service() -> SearchService {
    memory_service_with(SearchConfig::default())
}

/// In-memory service driven by `clock`
pub fn memory_service_with_clock(clock: Arc<dyn Clock>) -> SearchService {
    SearchService::with_backend(
        memory_config(SearchConfig::default()),
        Arc::new(InMemoryBackend::with_clock(clock)),
    )
    .unwrap()
}

/// In-memory service built from `config` with backend and default tenant forced
pub fn memory_service_with(config: SearchConfig) -> SearchService {
    SearchService::with_backend(memory_config(config), Arc::new(InMemoryBackend::new())).unwrap()
}

fn memory_config(config: SearchConfig) -> SearchConfig {
    SearchConfig {
        backend: BackendKind::InMemory,
        default_app_id: Some(DEFAULT_APP.to_string()),
        ..config
    }
}

/// Ids of a result set, in result order
pub fn ids(results: &ResultSet<Document>) -> Vec<String> {
    results.items.iter().map(|doc| doc.id.clone()).collect()
}

/// Follow cursors until the query is exhausted, returning every id seen
pub async fn drain(
    service: &SearchService,
    app_id: Option<&str>,
    query: &SearchQuery,
    mut pager: Pager,
) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let page: ResultSet<Document> = service.find(app_id, query, &mut pager).await.unwrap();
        seen.extend(ids(&page));
        if pager.cursor.is_none() {
            return seen;
        }
    }
}
