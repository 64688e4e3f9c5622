//! Offset and cursor pagination

mod common;

use common::{drain, ids, memory_service, memory_service_with, tantivy_service, tantivy_service_with};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tenant_search::models::{Document, Pager};
use tenant_search::search::{ResultSet, SearchConfig, SearchQuery, SearchService};
use tenant_search::SearchError;

async fn seed(service: &SearchService, count: usize) -> Vec<String> {
    let docs: Vec<Document> = (0..count)
        .map(|i| {
            Document::new("item", format!("item-{:03}", i))
                .with_field("rank", (i * 7) % 11)
                .with_field("title", "shared title")
        })
        .collect();
    let report = service.index_all(None, &docs).await.unwrap();
    assert!(report.is_complete());
    service.refresh(None).await.unwrap();
    docs.into_iter().map(|d| d.id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn cursor_pages_yield_every_record_once(
        count in 0usize..60,
        page_size in 1usize..15,
        window in 1usize..8,
        sorted in any::<bool>(),
        ranked in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let service = memory_service_with(SearchConfig {
                scan_window: window,
                ..Default::default()
            });
            let expected: BTreeSet<String> = seed(&service, count).await.into_iter().collect();

            let pager = if sorted {
                Pager::new(page_size).with_sort("rank", false)
            } else {
                Pager::new(page_size)
            };
            let text = if ranked { "shared" } else { "*" };
            let seen = drain(&service, None, &SearchQuery::text(text).of_type("item"), pager).await;

            let unique: BTreeSet<String> = seen.iter().cloned().collect();
            prop_assert_eq!(unique.len(), seen.len());
            prop_assert_eq!(unique, expected);
            Ok(())
        })?;
    }

    #[test]
    fn offset_pages_yield_every_record_once(count in 0usize..60, page_size in 1usize..15, window in 1usize..8) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let service = memory_service_with(SearchConfig {
                scan_window: window,
                ..Default::default()
            });
            let expected = seed(&service, count).await;

            let mut seen = Vec::new();
            let mut page = 1;
            loop {
                let mut pager = Pager::new(page_size).with_page(page);
                let results: ResultSet<Document> = service
                    .find_query(None, Some("item"), "", &mut pager)
                    .await
                    .unwrap();
                prop_assert_eq!(results.total_count, count as u64);
                if results.is_empty() {
                    break;
                }
                seen.extend(ids(&results));
                page += 1;
            }

            prop_assert_eq!(seen, expected);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_pager_is_advanced() {
    let service = memory_service();
    seed(&service, 5).await;

    let mut pager = Pager::new(2);
    let first: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&first), vec!["item-000", "item-001"]);
    assert_eq!(pager.total_count, 5);
    assert_eq!(pager.page, 2);
    assert!(pager.has_more());
    assert_eq!(first.next_cursor, pager.cursor);

    let second: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&second), vec!["item-002", "item-003"]);

    let last: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&last), vec!["item-004"]);
    assert!(!pager.has_more());
    assert!(last.next_cursor.is_none());
}

#[tokio::test]
async fn test_cursor_is_stable_under_concurrent_writes() {
    let service = memory_service();
    seed(&service, 6).await;

    let mut pager = Pager::new(3);
    let first: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&first), vec!["item-000", "item-001", "item-002"]);

    // Inserts before the cursor and removal of an already returned record
    // must not shift the next page
    service
        .index(None, &Document::new("item", "item-000a"))
        .await
        .unwrap();
    service
        .unindex(None, &Document::new("item", "item-001"))
        .await
        .unwrap();
    service
        .index(None, &Document::new("item", "item-004a"))
        .await
        .unwrap();

    let second: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&second), vec!["item-003", "item-004", "item-004a"]);
    assert_eq!(second.total_count, 7);
}

#[tokio::test]
async fn test_sort_by_field_puts_missing_values_last() {
    let service = memory_service();
    let docs = vec![
        Document::new("item", "a").with_field("price", 20),
        Document::new("item", "b"),
        Document::new("item", "c").with_field("price", 5),
        Document::new("item", "d").with_field("price", 20),
    ];
    service.index_all(None, &docs).await.unwrap();

    let mut pager = Pager::default().with_sort("price", true);
    let ascending: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&ascending), vec!["c", "a", "d", "b"]);

    let mut pager = Pager::default().with_sort("price", false);
    let descending: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(ids(&descending), vec!["a", "d", "c", "b"]);
}

#[tokio::test]
async fn test_page_size_is_clamped() {
    let service = memory_service_with(SearchConfig {
        max_page_size: 4,
        default_page_size: 2,
        ..Default::default()
    });
    seed(&service, 10).await;

    let mut pager = Pager::new(1_000);
    let results: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(pager.page_size, 4);

    let mut pager = Pager::new(0);
    let results: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_foreign_cursor_is_rejected() {
    let service = memory_service();
    seed(&service, 4).await;

    let mut pager = Pager::new(2).with_sort("rank", true);
    let _: ResultSet<Document> = service
        .find_query(None, Some("item"), "*", &mut pager)
        .await
        .unwrap();
    let cursor = pager.cursor.clone().unwrap();

    let mut unsorted = Pager::new(2).with_cursor(cursor);
    let result: Result<ResultSet<Document>, _> = service
        .find_query(None, Some("item"), "*", &mut unsorted)
        .await;
    assert!(matches!(result, Err(SearchError::Validation(_))));

    let mut garbage = Pager::new(2).with_cursor("not-a-cursor!");
    let result: Result<ResultSet<Document>, _> = service
        .find_query(None, Some("item"), "*", &mut garbage)
        .await;
    assert!(matches!(result, Err(SearchError::Validation(_))));
}

#[tokio::test]
async fn test_tantivy_cursor_pages_by_relevance() {
    let (service, _dir) = tantivy_service();
    seed(&service, 25).await;

    let seen = drain(
        &service,
        None,
        &SearchQuery::text("shared").of_type("item"),
        Pager::new(4),
    )
    .await;

    let unique: BTreeSet<String> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 25);
    assert_eq!(unique.len(), 25);
}

#[tokio::test]
async fn test_tantivy_key_order_past_scan_window() {
    let (service, _dir) = tantivy_service_with(SearchConfig {
        scan_window: 2,
        ..Default::default()
    });
    for id in ["e", "d", "c", "b", "a"] {
        service.index(None, &Document::new("item", id)).await.unwrap();
    }

    let query = SearchQuery::text("*").of_type("item");
    let mut pager = Pager::new(2);
    let first: ResultSet<Document> = service.find(None, &query, &mut pager).await.unwrap();
    assert_eq!(ids(&first), vec!["a", "b"]);
    assert_eq!(first.total_count, 5);

    let second: ResultSet<Document> = service.find(None, &query, &mut pager).await.unwrap();
    assert_eq!(ids(&second), vec!["c", "d"]);
    assert_eq!(second.total_count, 5);

    let seen = drain(&service, None, &query, Pager::new(2)).await;
    assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);

    let mut offset = Pager::new(2).with_page(3);
    let last: ResultSet<Document> = service.find(None, &query, &mut offset).await.unwrap();
    assert_eq!(ids(&last), vec!["e"]);
}

#[tokio::test]
async fn test_tantivy_relevance_past_scan_window() {
    let (service, _dir) = tantivy_service_with(SearchConfig {
        scan_window: 3,
        ..Default::default()
    });
    let expected: BTreeSet<String> = seed(&service, 20).await.into_iter().collect();

    let seen = drain(
        &service,
        None,
        &SearchQuery::text("shared").of_type("item"),
        Pager::new(4),
    )
    .await;

    let unique: BTreeSet<String> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 20);
    assert_eq!(unique, expected);
}
