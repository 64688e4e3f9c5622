//! Query execution: plan, fetch candidates, filter, order and page
//!
//! Candidates are fetched in rounds. The first round asks the backend for
//! `scan_window` matches (or as many as the requested page needs); while the
//! fetched prefix ends before the page does, the window doubles. Key-ordered
//! cursors are pushed down to the backend as a search-after clause. Orders
//! the backend cannot produce (distance, source fields) load every match.

use crate::backend::{HitSort, RawHit, SearchBackend};
use crate::error::SearchResult;
use crate::models::Pager;
use crate::search::geo::haversine_km;
use crate::search::paging::{decode_cursor, paginate, HitOrder, ScoredHit};
use crate::search::query::{Clause, QueryPlan, QueryTranslator, SearchQuery};
use crate::search::tenant::Namespace;
use std::sync::Arc;

/// Ordered page of raw hits
#[derive(Debug, Clone)]
pub struct Page {
    pub hits: Vec<RawHit>,
    pub total: u64,
    pub next_cursor: Option<String>,
}

/// Runs translated queries against a backend
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn SearchBackend>,
    translator: QueryTranslator,
    max_page_size: usize,
    scan_window: usize,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn SearchBackend>, max_page_size: usize, scan_window: usize) -> Self {
        Self {
            backend,
            translator: QueryTranslator::new(),
            max_page_size,
            scan_window: scan_window.max(1),
        }
    }

    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }

    /// Execute `query` and advance `pager` past the returned page
    pub async fn execute(
        &self,
        namespace: &Namespace,
        query: &SearchQuery,
        pager: &mut Pager,
    ) -> SearchResult<Page> {
        let plan = self.translator.translate(query)?;
        self.execute_plan(namespace, &plan, pager).await
    }

    pub async fn execute_plan(
        &self,
        namespace: &Namespace,
        plan: &QueryPlan,
        pager: &mut Pager,
    ) -> SearchResult<Page> {
        pager.clamp(self.max_page_size);

        let order = HitOrder::resolve(plan.ranking, pager);
        let sort = match order {
            HitOrder::Relevance => HitSort::Score,
            _ => HitSort::Key,
        };
        let loads_all =
            plan.geo.is_some() || matches!(order, HitOrder::Distance | HitOrder::Field { .. });

        let cursor = pager
            .cursor
            .as_deref()
            .map(|token| decode_cursor(token, &order))
            .transpose()?;

        // Search after the cursor inside the backend when it orders by key
        let (clause, after_cursor) = match &cursor {
            Some(cursor) if order == HitOrder::Key && !loads_all => (
                Clause::all(vec![plan.clause.clone(), Clause::After(cursor.key())]),
                true,
            ),
            _ => (plan.clause.clone(), false),
        };

        let needed = if cursor.is_some() {
            pager.page_size.saturating_add(1)
        } else {
            pager.offset().saturating_add(pager.page_size).saturating_add(1)
        };
        let mut limit = if after_cursor {
            needed
        } else {
            needed.max(self.scan_window)
        };

        let (window, total) = loop {
            let candidates = self.backend.search(namespace, &clause, sort, limit).await?;
            let fetched = candidates.hits.len();
            let exhausted = fetched < limit || fetched as u64 >= candidates.total;

            if loads_all && !exhausted {
                limit = usize::try_from(candidates.total).unwrap_or(usize::MAX);
                continue;
            }

            let (hits, total) = match plan.geo {
                Some(geo) => {
                    let hits: Vec<ScoredHit> = candidates
                        .hits
                        .into_iter()
                        .filter_map(|hit| {
                            let distance = haversine_km(geo.center, hit.location?);
                            (distance <= geo.radius_km).then_some(ScoredHit {
                                hit,
                                distance: Some(distance),
                            })
                        })
                        .collect();
                    let total = hits.len() as u64;
                    (hits, total)
                }
                None => (
                    candidates.hits.into_iter().map(ScoredHit::from).collect(),
                    candidates.total,
                ),
            };

            if let Some(window) = paginate(hits, &order, pager, exhausted)? {
                break (window, total);
            }

            tracing::debug!(
                namespace = %namespace,
                shape = plan.shape,
                limit,
                "Widening candidate window"
            );
            limit = limit.saturating_mul(2);
        };

        // Matches past a pushed-down cursor are not all matches
        let total = if after_cursor {
            self.backend
                .count(namespace, &plan.clause)
                .await?
                .unwrap_or(total)
        } else {
            total
        };

        tracing::debug!(
            namespace = %namespace,
            shape = plan.shape,
            total,
            returned = window.hits.len(),
            "Query executed"
        );

        pager.total_count = total;
        pager.cursor = window.next_cursor.clone();
        pager.page = pager.page.saturating_add(1);

        Ok(Page {
            hits: window.hits.into_iter().map(|scored| scored.hit).collect(),
            total,
            next_cursor: window.next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::models::Document;
    use crate::search::document::IndexRecord;
    use crate::search::tenant::TenantResolver;

    async fn setup(docs: &[Document]) -> (QueryExecutor, Namespace) {
        let backend = Arc::new(InMemoryBackend::new());
        let ns = TenantResolver::new("t-", None)
            .unwrap()
            .resolve(Some("app"))
            .unwrap();
        let records = docs
            .iter()
            .map(|doc| IndexRecord::from_object(doc, None).unwrap())
            .collect();
        backend.upsert(&ns, records).await.unwrap();
        (QueryExecutor::new(backend, 100, 1_000), ns)
    }

    #[tokio::test]
    async fn test_pager_is_advanced() {
        let docs: Vec<_> = (0..5)
            .map(|i| Document::new("item", format!("{i}")))
            .collect();
        let (executor, ns) = setup(&docs).await;

        let mut pager = Pager::new(2);
        let page = executor
            .execute(&ns, &SearchQuery::text("*"), &mut pager)
            .await
            .unwrap();

        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.total, 5);
        assert_eq!(pager.total_count, 5);
        assert_eq!(pager.page, 2);
        assert!(pager.cursor.is_some());
    }

    #[tokio::test]
    async fn test_page_size_is_clamped() {
        let docs: Vec<_> = (0..3)
            .map(|i| Document::new("item", format!("{i}")))
            .collect();
        let (executor, ns) = setup(&docs).await;

        let mut pager = Pager::new(0);
        let page = executor
            .execute(&ns, &SearchQuery::text(""), &mut pager)
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 1);
        assert_eq!(pager.page_size, 1);
    }

    #[tokio::test]
    async fn test_pages_reach_past_scan_window() {
        let docs: Vec<_> = (0..7)
            .map(|i| Document::new("item", format!("i{i}")).with_field("name", "alpha"))
            .collect();
        let backend = Arc::new(InMemoryBackend::new());
        let ns = TenantResolver::new("t-", None)
            .unwrap()
            .resolve(Some("app"))
            .unwrap();
        let records = docs
            .iter()
            .map(|doc| IndexRecord::from_object(doc, None).unwrap())
            .collect();
        backend.upsert(&ns, records).await.unwrap();
        let executor = QueryExecutor::new(backend, 100, 3);

        for query in [SearchQuery::text("*"), SearchQuery::text("alpha")] {
            let mut pager = Pager::new(2);
            let mut seen = Vec::new();
            loop {
                let page = executor.execute(&ns, &query, &mut pager).await.unwrap();
                assert_eq!(page.total, 7);
                seen.extend(page.hits.into_iter().map(|hit| hit.key.id));
                if pager.cursor.is_none() {
                    break;
                }
            }
            assert_eq!(seen, vec!["i0", "i1", "i2", "i3", "i4", "i5", "i6"]);
        }

        let mut pager = Pager::new(2).with_page(4);
        let page = executor
            .execute(&ns, &SearchQuery::text("*"), &mut pager)
            .await
            .unwrap();
        let ids: Vec<_> = page.hits.iter().map(|hit| hit.key.id.as_str()).collect();
        assert_eq!(ids, vec!["i6"]);
    }

    #[tokio::test]
    async fn test_geo_filter_is_exact() {
        let docs = vec![
            Document::new("place", "near").with_location(42.0, 23.0),
            // Inside the bounding box corner but outside the circle
            Document::new("place", "corner").with_location(42.089, 23.12),
            Document::new("place", "nowhere"),
        ];
        let (executor, ns) = setup(&docs).await;

        let mut pager = Pager::default();
        let page = executor
            .execute(&ns, &SearchQuery::nearby(42.0, 23.0, 10.0, None), &mut pager)
            .await
            .unwrap();

        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].key.id, "near");
        assert_eq!(pager.total_count, 1);
    }
}
