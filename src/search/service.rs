//! Main search service implementation

use crate::backend::{create_backend, HitSort, IndexStats, RawHit, SearchBackend};
use crate::error::{SearchError, SearchResult};
use crate::metrics;
use crate::models::{ObjectKey, Pager, Searchable};
use crate::search::config::SearchConfig;
use crate::search::count::CountEngine;
use crate::search::document::{hydrate, validate_key, IndexRecord};
use crate::search::executor::{Page, QueryExecutor};
use crate::search::indexer::{BatchFailure, BatchReport, Indexer};
use crate::search::query::{SearchQuery, Terms};
use crate::search::tenant::{Namespace, TenantResolver};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hydrated results of one query
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet<P> {
    /// Objects in result order
    pub items: Vec<P>,

    /// Total matches of the query, across all pages
    pub total_count: u64,

    /// Token for the next page, `None` once exhausted
    pub next_cursor: Option<String>,

    /// Records on this page that could not be hydrated
    pub dropped: usize,
}

impl<P> ResultSet<P> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<P> IntoIterator for ResultSet<P> {
    type Item = P;
    type IntoIter = std::vec::IntoIter<P>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Multi-tenant search facade
///
/// Every operation takes the app id first; `None` selects the configured
/// default tenant.
pub struct SearchService {
    /// Engine
    backend: Arc<dyn SearchBackend>,

    /// App id to namespace mapping
    tenants: TenantResolver,

    indexer: Indexer,
    executor: QueryExecutor,
    counter: CountEngine,

    /// Configuration
    config: SearchConfig,

    /// Records dropped during hydration since construction
    hydration_failures: AtomicU64,
}

impl SearchService {
    /// Create a new search service with the backend named in `config`
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        config.validate_settings()?;
        let backend = create_backend(&config)?;
        Self::with_backend(config, backend)
    }

    /// Create a search service over an existing backend
    pub fn with_backend(config: SearchConfig, backend: Arc<dyn SearchBackend>) -> SearchResult<Self> {
        let tenants = TenantResolver::from_config(&config)?;

        tracing::info!(
            backend = backend.name(),
            default_app_id = ?tenants.default_app_id(),
            prefix = tenants.prefix(),
            "Search service initialized"
        );

        Ok(Self {
            indexer: Indexer::new(
                Arc::clone(&backend),
                config.batch_size,
                config.batch_concurrency,
            ),
            executor: QueryExecutor::new(
                Arc::clone(&backend),
                config.max_page_size,
                config.scan_window,
            ),
            counter: CountEngine::new(Arc::clone(&backend)),
            backend,
            tenants,
            config,
            hydration_failures: AtomicU64::new(0),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Namespace an app id maps to
    pub fn namespace(&self, app_id: Option<&str>) -> SearchResult<Namespace> {
        self.tenants.resolve(app_id)
    }

    /// Records dropped during hydration since construction
    pub fn hydration_failures(&self) -> u64 {
        self.hydration_failures.load(Ordering::Relaxed)
    }

    /// A pager with the configured default page size
    pub fn pager(&self) -> Pager {
        Pager::new(self.config.default_page_size)
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    /// Index one object; re-indexing the same `(type, id)` replaces it
    pub async fn index<O: Searchable + ?Sized>(&self, app_id: Option<&str>, object: &O) -> SearchResult<()> {
        self.timed("index", async {
            let namespace = self.namespace(app_id)?;
            let record = IndexRecord::from_object(object, None)?;
            self.indexer.index(&namespace, record).await
        })
        .await
    }

    /// Index one object that disappears from the index after `ttl`
    pub async fn index_with_ttl<O: Searchable + ?Sized>(
        &self,
        app_id: Option<&str>,
        object: &O,
        ttl: Duration,
    ) -> SearchResult<()> {
        self.timed("index", async {
            let namespace = self.namespace(app_id)?;
            let record = IndexRecord::from_object(object, Some(ttl))?;
            self.indexer.index(&namespace, record).await
        })
        .await
    }

    /// Remove one object; removing a missing object is a no-op
    pub async fn unindex<O: Searchable + ?Sized>(&self, app_id: Option<&str>, object: &O) -> SearchResult<()> {
        self.timed("unindex", async {
            let namespace = self.namespace(app_id)?;
            validate_key(object.object_type(), object.id())?;
            self.indexer.unindex(&namespace, object.key()).await
        })
        .await
    }

    /// Index many objects; failures are reported per object, not raised
    pub async fn index_all<O: Searchable>(&self, app_id: Option<&str>, objects: &[O]) -> SearchResult<BatchReport> {
        self.timed("index_all", async {
            let namespace = self.namespace(app_id)?;

            let mut records = Vec::with_capacity(objects.len());
            let mut rejected = Vec::new();
            for object in objects {
                match IndexRecord::from_object(object, None) {
                    Ok(record) => records.push(record),
                    Err(e) => rejected.push(rejection(object, &e)),
                }
            }

            Ok(self.indexer.index_all(&namespace, records, rejected).await)
        })
        .await
    }

    /// Remove many objects; failures are reported per object, not raised
    pub async fn unindex_all<O: Searchable>(&self, app_id: Option<&str>, objects: &[O]) -> SearchResult<BatchReport> {
        self.timed("unindex_all", async {
            let namespace = self.namespace(app_id)?;

            let mut keys = Vec::with_capacity(objects.len());
            let mut rejected = Vec::new();
            for object in objects {
                match validate_key(object.object_type(), object.id()) {
                    Ok(()) => keys.push(object.key()),
                    Err(e) => rejected.push(rejection(object, &e)),
                }
            }

            Ok(self.indexer.unindex_all(&namespace, keys, rejected).await)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Run any query shape; `pager` is advanced past the returned page
    pub async fn find<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        query: &SearchQuery,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        self.timed("find", async {
            let namespace = self.namespace(app_id)?;
            let page = self.executor.execute(&namespace, query, pager).await?;
            Ok(self.hydrate_page(&namespace, query.shape.name(), page))
        })
        .await
    }

    /// Object with `id`, if indexed
    pub async fn find_by_id<P: DeserializeOwned>(&self, app_id: Option<&str>, id: &str) -> SearchResult<Option<P>> {
        let mut pager = Pager::new(1);
        let result = self.find(app_id, &SearchQuery::by_id(id), &mut pager).await?;
        Ok(result.items.into_iter().next())
    }

    /// Objects with the given ids, in the order requested; missing ids are skipped
    pub async fn find_by_ids<P: DeserializeOwned>(&self, app_id: Option<&str>, ids: &[String]) -> SearchResult<Vec<P>> {
        self.timed("find_by_ids", async {
            let namespace = self.namespace(app_id)?;

            let mut positions: HashMap<&str, usize> = HashMap::new();
            for id in ids.iter().filter(|id| !id.trim().is_empty()) {
                let next = positions.len();
                positions.entry(id.as_str()).or_insert(next);
            }
            if positions.is_empty() {
                return Ok(Vec::new());
            }

            let unique: Vec<String> = {
                let mut unique: Vec<(&str, usize)> = positions.iter().map(|(id, pos)| (*id, *pos)).collect();
                unique.sort_by_key(|(_, pos)| *pos);
                unique.into_iter().map(|(id, _)| id.to_string()).collect()
            };
            let mut hits: Vec<RawHit> = Vec::with_capacity(unique.len());
            for chunk in unique.chunks(self.config.scan_window.max(1)) {
                let plan = self.executor.translator().translate_ids(chunk);
                // An id may be taken by several types
                let mut limit = chunk.len();
                loop {
                    let candidates = self
                        .backend
                        .search(&namespace, &plan.clause, HitSort::Key, limit)
                        .await?;
                    let fetched = candidates.hits.len();
                    if fetched < limit || fetched as u64 >= candidates.total {
                        hits.extend(candidates.hits);
                        break;
                    }
                    limit = usize::try_from(candidates.total).unwrap_or(usize::MAX);
                }
            }
            hits.sort_by_key(|hit| positions.get(hit.key.id.as_str()).copied().unwrap_or(usize::MAX));

            let total = hits.len() as u64;
            let page = Page {
                hits,
                total,
                next_cursor: None,
            };
            Ok(self.hydrate_page(&namespace, "ids", page).items)
        })
        .await
    }

    /// Ranked full-text search; empty or `*` matches everything
    pub async fn find_query<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        query: &str,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(SearchQuery::text(query), object_type);
        self.find(app_id, &query, pager).await
    }

    /// Objects whose `field` starts with `prefix`
    pub async fn find_prefix<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        field: &str,
        prefix: &str,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(SearchQuery::prefix(field, prefix), object_type);
        self.find(app_id, &query, pager).await
    }

    /// Objects whose whole `field` value matches a `*`/`?` glob
    pub async fn find_wildcard<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        field: &str,
        pattern: &str,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(SearchQuery::wildcard(field, pattern), object_type);
        self.find(app_id, &query, pager).await
    }

    /// Objects matching all (`match_all`) or any of the field values
    pub async fn find_terms<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        terms: &Terms,
        match_all: bool,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(SearchQuery::terms(terms.clone(), match_all), object_type);
        self.find(app_id, &query, pager).await
    }

    /// Objects whose `field` equals one of `values`
    pub async fn find_term_in_list<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        field: &str,
        values: &[Value],
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(SearchQuery::term_in_list(field, values.to_vec()), object_type);
        self.find(app_id, &query, pager).await
    }

    /// Objects carrying every tag in `tags`
    pub async fn find_tagged<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        tags: &[String],
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(SearchQuery::tagged(tags.iter().cloned()), object_type);
        self.find(app_id, &query, pager).await
    }

    /// Objects resembling `like_text` in `fields`, most similar first
    pub async fn find_similar<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        exclude_id: Option<&str>,
        fields: &[String],
        like_text: &str,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(
            SearchQuery::similar(fields.to_vec(), like_text, exclude_id.map(str::to_string)),
            object_type,
        );
        self.find(app_id, &query, pager).await
    }

    /// Objects within `radius_km` of a point, nearest first
    #[allow(clippy::too_many_arguments)]
    pub async fn find_nearby<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        query: Option<&str>,
        lat: f64,
        lng: f64,
        radius_km: f64,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        let query = typed(
            SearchQuery::nearby(lat, lng, radius_km, query.map(str::to_string)),
            object_type,
        );
        self.find(app_id, &query, pager).await
    }

    /// Tag records whose name starts with `keyword`
    pub async fn find_tags<P: DeserializeOwned>(
        &self,
        app_id: Option<&str>,
        keyword: &str,
        pager: &mut Pager,
    ) -> SearchResult<ResultSet<P>> {
        self.find(app_id, &SearchQuery::tags(keyword), pager).await
    }

    // ------------------------------------------------------------------
    // Counting and maintenance
    // ------------------------------------------------------------------

    /// Number of objects of a type matching every term (all of the type without terms)
    pub async fn get_count(
        &self,
        app_id: Option<&str>,
        object_type: Option<&str>,
        terms: Option<&Terms>,
    ) -> SearchResult<Option<u64>> {
        self.timed("count", async {
            let namespace = self.namespace(app_id)?;
            self.counter.count(&namespace, object_type, terms).await
        })
        .await
    }

    /// Make all previous writes of a tenant visible
    pub async fn refresh(&self, app_id: Option<&str>) -> SearchResult<()> {
        self.timed("refresh", async {
            let namespace = self.namespace(app_id)?;
            self.backend.refresh(&namespace).await
        })
        .await
    }

    /// Remove every indexed object of a tenant
    pub async fn clear(&self, app_id: Option<&str>) -> SearchResult<()> {
        self.timed("clear", async {
            let namespace = self.namespace(app_id)?;
            self.backend.clear(&namespace).await
        })
        .await
    }

    /// Get index statistics of a tenant
    pub async fn stats(&self, app_id: Option<&str>) -> SearchResult<IndexStats> {
        self.timed("stats", async {
            let namespace = self.namespace(app_id)?;
            self.backend.stats(&namespace).await
        })
        .await
    }

    fn hydrate_page<P: DeserializeOwned>(&self, namespace: &Namespace, shape: &str, page: Page) -> ResultSet<P> {
        let mut items = Vec::with_capacity(page.hits.len());
        let mut dropped = 0;

        for RawHit { key, source, .. } in page.hits {
            match hydrate::<P>(source) {
                Ok(item) => items.push(item),
                Err(e) => {
                    dropped += 1;
                    tracing::warn!(
                        namespace = %namespace,
                        shape,
                        object_type = %key.object_type,
                        id = %key.id,
                        error = %e,
                        "Dropping record that failed to hydrate"
                    );
                }
            }
        }

        if dropped > 0 {
            self.hydration_failures
                .fetch_add(dropped as u64, Ordering::Relaxed);
            metrics::HYDRATION_FAILURES_TOTAL.inc_by(dropped as u64);
        }

        ResultSet {
            items,
            total_count: page.total,
            next_cursor: page.next_cursor,
            dropped,
        }
    }

    async fn timed<T, F>(&self, operation: &str, fut: F) -> SearchResult<T>
    where
        F: Future<Output = SearchResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        metrics::record_operation(operation, self.backend.name(), started, result.is_ok());

        if let Err(e) = &result {
            match e {
                SearchError::Validation(_) => tracing::debug!(operation, error = %e, "Rejected request"),
                _ => tracing::error!(operation, error = %e, code = e.error_code(), "Search operation failed"),
            }
        }
        result
    }
}

fn typed(query: SearchQuery, object_type: Option<&str>) -> SearchQuery {
    match object_type {
        Some(object_type) => query.of_type(object_type),
        None => query,
    }
}

fn rejection<O: Searchable + ?Sized>(object: &O, error: &SearchError) -> BatchFailure {
    let ObjectKey { object_type, id } = object.key();
    BatchFailure {
        object_type,
        id,
        reason: error.to_string(),
    }
}
