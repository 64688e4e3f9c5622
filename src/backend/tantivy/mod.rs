//! Tantivy backend: one index per namespace
//!
//! Indexes live under `index_path/<namespace>` or, without an index path, in
//! RAM. They are opened lazily on first use. Every read is restricted to
//! records whose `_expires` deadline has not passed; every write purges the
//! ones that have.

pub mod query;
pub mod schema;
pub mod sort;

use crate::backend::{
    Candidates, Clock, HitSort, IndexStats, RecordFailure, SearchBackend, SystemClock,
};
use crate::error::{SearchError, SearchResult};
use crate::models::ObjectKey;
use crate::search::config::SearchConfig;
use crate::search::document::IndexRecord;
use crate::search::query::Clause;
use crate::search::tenant::Namespace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use query::QueryBuilder;
use schema::{build_schema, SchemaFields};
use sort::{ByKey, ByScoreThenKey};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tokio::sync::RwLock;

/// A namespace's index with its writer and reader
pub struct NamespaceIndex {
    /// The Tantivy index
    index: Index,

    /// Handles to the schema's fields
    fields: SchemaFields,

    /// Index writer (wrapped in RwLock for thread-safety)
    writer: RwLock<IndexWriter>,

    /// Index reader, reloaded after each commit
    reader: IndexReader,

    /// Directory of the index, `None` in RAM
    path: Option<PathBuf>,

    /// Millis of the last commit, 0 if none
    last_commit: AtomicI64,
}

impl NamespaceIndex {
    fn open(path: Option<PathBuf>, config: &SearchConfig) -> SearchResult<Self> {
        let index = match &path {
            Some(path) => {
                std::fs::create_dir_all(path).map_err(|e| {
                    SearchError::BackendUnavailable(format!(
                        "Failed to create index directory: {}",
                        e
                    ))
                })?;

                if index_exists(path) {
                    Index::open_in_dir(path).map_err(|e| {
                        SearchError::BackendUnavailable(format!(
                            "Failed to open existing index: {}",
                            e
                        ))
                    })?
                } else {
                    Index::create_in_dir(path, build_schema()).map_err(|e| {
                        SearchError::BackendUnavailable(format!(
                            "Failed to create new index: {}",
                            e
                        ))
                    })?
                }
            }
            None => Index::create_in_ram(build_schema()),
        };

        let fields = SchemaFields::from_schema(&index.schema())?;

        let writer: IndexWriter = index
            .writer_with_num_threads(config.indexing_threads, config.writer_heap_size)
            .map_err(|e| {
                SearchError::BackendUnavailable(format!("Failed to create writer: {}", e))
            })?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| {
                SearchError::BackendUnavailable(format!("Failed to create reader: {}", e))
            })?;

        Ok(Self {
            index,
            fields,
            writer: RwLock::new(writer),
            reader,
            path,
            last_commit: AtomicI64::new(0),
        })
    }

    fn query_builder(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.index, self.fields)
    }

    /// Commit pending changes and make them visible to readers
    fn commit(&self, writer: &mut IndexWriter) -> SearchResult<()> {
        writer
            .commit()
            .map_err(|e| SearchError::BackendUnavailable(format!("Failed to commit: {}", e)))?;
        self.reader
            .reload()
            .map_err(|e| SearchError::BackendUnavailable(format!("Failed to reload reader: {}", e)))?;
        self.last_commit
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        Ok(())
    }
}

/// Check if an index exists at the given path
fn index_exists(path: &Path) -> bool {
    path.join("meta.json").exists()
}

/// Tantivy-backed search backend
pub struct TantivyBackend {
    config: SearchConfig,
    indexes: DashMap<Namespace, Arc<OnceCell<Arc<NamespaceIndex>>>>,
    clock: Arc<dyn Clock>,
}

impl TantivyBackend {
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SearchConfig, clock: Arc<dyn Clock>) -> SearchResult<Self> {
        if let Some(path) = &config.index_path {
            std::fs::create_dir_all(path).map_err(|e| {
                SearchError::Configuration(format!(
                    "Failed to create index directory {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            config,
            indexes: DashMap::new(),
            clock,
        })
    }

    fn namespace_path(&self, namespace: &Namespace) -> Option<PathBuf> {
        self.config
            .index_path
            .as_ref()
            .map(|base| base.join(namespace.as_str()))
    }

    /// Index of a namespace, creating it if needed
    fn open_or_create(&self, namespace: &Namespace) -> SearchResult<Arc<NamespaceIndex>> {
        // Only the cell is created under the map's shard lock; callers for the
        // same namespace wait on the cell while it opens the index
        let cell = Arc::clone(self.indexes.entry(namespace.clone()).or_default().value());

        let index = cell.get_or_try_init(|| {
            let path = self.namespace_path(namespace);
            let index = NamespaceIndex::open(path.clone(), &self.config)?;
            tracing::info!(namespace = %namespace, path = ?path, "Namespace index opened");
            Ok::<_, SearchError>(Arc::new(index))
        })?;

        Ok(Arc::clone(index))
    }

    /// Index of a namespace if it was ever written to
    fn open_existing(&self, namespace: &Namespace) -> SearchResult<Option<Arc<NamespaceIndex>>> {
        let opened = self
            .indexes
            .get(namespace)
            .and_then(|cell| cell.value().get().cloned());
        if let Some(index) = opened {
            return Ok(Some(index));
        }

        match self.namespace_path(namespace) {
            Some(path) if index_exists(&path) => self.open_or_create(namespace).map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl SearchBackend for TantivyBackend {
    fn name(&self) -> &'static str {
        "tantivy"
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        records: Vec<IndexRecord>,
    ) -> SearchResult<Vec<RecordFailure>> {
        let index = self.open_or_create(namespace)?;
        let now = self.clock.now_millis();
        let mut failures = Vec::new();

        let mut writer = index.writer.write().await;

        for record in records {
            let doc = match index.fields.to_tantivy_doc(&record, record.expires_at(now)) {
                Ok(doc) => doc,
                Err(e) => {
                    failures.push(RecordFailure {
                        key: record.key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            // Delete existing document with same key first
            writer.delete_term(index.fields.key_term(&record.key));

            if let Err(e) = writer.add_document(doc) {
                failures.push(RecordFailure {
                    key: record.key,
                    reason: format!("Failed to add document: {}", e),
                });
            }
        }

        writer
            .delete_query(QueryBuilder::expired(now))
            .map_err(|e| SearchError::Backend(format!("Failed to purge expired: {}", e)))?;

        // Commit if real-time indexing is enabled
        if self.config.realtime_indexing {
            index.commit(&mut writer)?;
        }

        Ok(failures)
    }

    async fn delete(
        &self,
        namespace: &Namespace,
        keys: &[ObjectKey],
    ) -> SearchResult<Vec<RecordFailure>> {
        let Some(index) = self.open_existing(namespace)? else {
            return Ok(Vec::new());
        };
        let now = self.clock.now_millis();

        let mut writer = index.writer.write().await;
        for key in keys {
            writer.delete_term(index.fields.key_term(key));
        }
        writer
            .delete_query(QueryBuilder::expired(now))
            .map_err(|e| SearchError::Backend(format!("Failed to purge expired: {}", e)))?;

        if self.config.realtime_indexing {
            index.commit(&mut writer)?;
        }

        Ok(Vec::new())
    }

    async fn search(
        &self,
        namespace: &Namespace,
        clause: &Clause,
        sort: HitSort,
        limit: usize,
    ) -> SearchResult<Candidates> {
        let Some(index) = self.open_existing(namespace)? else {
            return Ok(Candidates::default());
        };

        let query = index
            .query_builder()
            .build_live(clause, self.clock.now_millis())?;
        let searcher = index.reader.searcher();
        // The collector allocates for its limit up front
        let limit = limit.min(usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX));
        let top = TopDocs::with_limit(limit.max(1));

        let (top_docs, total): (Vec<(f32, DocAddress)>, usize) = match sort {
            HitSort::Score => {
                let (docs, total) = searcher
                    .search(&*query, &(top.tweak_score(ByScoreThenKey), Count))
                    .map_err(|e| SearchError::Backend(format!("Search execution failed: {}", e)))?;
                (
                    docs.into_iter()
                        .map(|((score, _), address)| (score, address))
                        .collect(),
                    total,
                )
            }
            HitSort::Key => {
                let (docs, total) = searcher
                    .search(&*query, &(top.custom_score(ByKey), Count))
                    .map_err(|e| SearchError::Backend(format!("Search execution failed: {}", e)))?;
                (
                    docs.into_iter().map(|(_, address)| (0.0, address)).collect(),
                    total,
                )
            }
        };

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| SearchError::Backend(format!("Failed to retrieve doc: {}", e)))?;
            hits.push(index.fields.to_hit(&doc, score)?);
        }

        Ok(Candidates {
            hits,
            total: total as u64,
        })
    }

    async fn count(&self, namespace: &Namespace, clause: &Clause) -> SearchResult<Option<u64>> {
        let Some(index) = self.open_existing(namespace)? else {
            return Ok(Some(0));
        };

        let query = index
            .query_builder()
            .build_live(clause, self.clock.now_millis())?;
        let count = index
            .reader
            .searcher()
            .search(&*query, &Count)
            .map_err(|e| SearchError::Backend(format!("Count failed: {}", e)))?;

        Ok(Some(count as u64))
    }

    async fn refresh(&self, namespace: &Namespace) -> SearchResult<()> {
        if let Some(index) = self.open_existing(namespace)? {
            let mut writer = index.writer.write().await;
            index.commit(&mut writer)?;
        }
        Ok(())
    }

    async fn clear(&self, namespace: &Namespace) -> SearchResult<()> {
        if let Some(index) = self.open_existing(namespace)? {
            let mut writer = index.writer.write().await;
            writer.delete_all_documents().map_err(|e| {
                SearchError::Backend(format!("Failed to clear index: {}", e))
            })?;
            index.commit(&mut writer)?;
            tracing::info!(namespace = %namespace, "Namespace cleared");
        }
        Ok(())
    }

    async fn stats(&self, namespace: &Namespace) -> SearchResult<IndexStats> {
        let Some(index) = self.open_existing(namespace)? else {
            return Ok(IndexStats::default());
        };

        let searcher = index.reader.searcher();
        let live = index
            .query_builder()
            .build_live(&Clause::MatchAll, self.clock.now_millis())?;

        // Count total documents
        let total_documents = searcher
            .search(&*live, &Count)
            .map_err(|e| SearchError::Backend(format!("Failed to count documents: {}", e)))?
            as u64;

        // Calculate approximate index size
        let index_size_bytes = index
            .path
            .as_ref()
            .and_then(|path| std::fs::read_dir(path).ok())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);

        let last_commit = index.last_commit.load(Ordering::SeqCst);

        Ok(IndexStats {
            total_documents,
            index_size_bytes,
            num_segments: searcher.segment_readers().len(),
            last_commit: (last_commit > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_commit))
                .flatten(),
        })
    }
}
