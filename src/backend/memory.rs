//! Process-local backend.
//!
//! Evaluates query clauses directly against the projected records. Writes
//! are visible immediately. Full text is matched token by token: a record
//! matches when it contains at least one query token, and scores by the
//! number of distinct query tokens it contains. Query operators are ignored.

use crate::backend::{
    Candidates, Clock, HitSort, IndexStats, RawHit, RecordFailure, SearchBackend, SystemClock,
};
use crate::error::{SearchError, SearchResult};
use crate::models::ObjectKey;
use crate::search::document::{tokenize, IndexRecord};
use crate::search::geo::BoundingBox;
use crate::search::query::{glob_to_regex, Clause};
use crate::search::tenant::Namespace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredRecord {
    record: IndexRecord,
    expires_at: Option<u64>,
}

impl StoredRecord {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
struct NamespaceStore {
    records: DashMap<ObjectKey, StoredRecord>,
    /// Millis of the last write, 0 if never written
    last_write: AtomicI64,
}

impl NamespaceStore {
    fn purge_expired(&self, now: u64) {
        self.records.retain(|_, stored| stored.is_live(now));
    }

    fn touch(&self) {
        self.last_write
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }
}

/// In-memory backend (for tests and embedding)
#[derive(Clone)]
pub struct InMemoryBackend {
    namespaces: Arc<DashMap<Namespace, Arc<NamespaceStore>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            namespaces: Arc::new(DashMap::new()),
            clock,
        }
    }

    fn namespace(&self, namespace: &Namespace) -> Option<Arc<NamespaceStore>> {
        self.namespaces
            .get(namespace)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn namespace_or_create(&self, namespace: &Namespace) -> Arc<NamespaceStore> {
        Arc::clone(
            self.namespaces
                .entry(namespace.clone())
                .or_insert_with(|| Arc::new(NamespaceStore::default()))
                .value(),
        )
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        records: Vec<IndexRecord>,
    ) -> SearchResult<Vec<RecordFailure>> {
        let store = self.namespace_or_create(namespace);
        let now = self.clock.now_millis();
        store.purge_expired(now);

        let count = records.len();
        for record in records {
            let expires_at = record.expires_at(now);
            store
                .records
                .insert(record.key.clone(), StoredRecord { record, expires_at });
        }
        store.touch();

        tracing::debug!(namespace = %namespace, count, "Records upserted");
        Ok(Vec::new())
    }

    async fn delete(
        &self,
        namespace: &Namespace,
        keys: &[ObjectKey],
    ) -> SearchResult<Vec<RecordFailure>> {
        if let Some(store) = self.namespace(namespace) {
            store.purge_expired(self.clock.now_millis());
            for key in keys {
                store.records.remove(key);
            }
            store.touch();
            tracing::debug!(namespace = %namespace, count = keys.len(), "Records deleted");
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
        let Some(store) = self.namespace(namespace) else {
            return Ok(Candidates::default());
        };

        let matcher = Matcher::compile(clause)?;
        let now = self.clock.now_millis();

        let mut hits: Vec<RawHit> = store
            .records
            .iter()
            .filter(|entry| entry.is_live(now))
            .filter_map(|entry| {
                let record = &entry.record;
                matcher.score(record).map(|score| RawHit {
                    key: record.key.clone(),
                    score,
                    source: Value::Object(record.source.clone()),
                    location: record.location,
                })
            })
            .collect();

        let total = hits.len() as u64;
        match sort {
            HitSort::Score => {
                hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)))
            }
            HitSort::Key => hits.sort_by(|a, b| a.key.cmp(&b.key)),
        }
        hits.truncate(limit);

        Ok(Candidates { hits, total })
    }

    async fn count(&self, namespace: &Namespace, clause: &Clause) -> SearchResult<Option<u64>> {
        let Some(store) = self.namespace(namespace) else {
            return Ok(Some(0));
        };

        let matcher = Matcher::compile(clause)?;
        let now = self.clock.now_millis();
        let count = store
            .records
            .iter()
            .filter(|entry| entry.is_live(now) && matcher.score(&entry.record).is_some())
            .count();

        Ok(Some(count as u64))
    }

    async fn refresh(&self, _namespace: &Namespace) -> SearchResult<()> {
        Ok(())
    }

    async fn clear(&self, namespace: &Namespace) -> SearchResult<()> {
        if let Some(store) = self.namespace(namespace) {
            store.records.clear();
            store.touch();
        }
        tracing::info!(namespace = %namespace, "Namespace cleared");
        Ok(())
    }

    async fn stats(&self, namespace: &Namespace) -> SearchResult<IndexStats> {
        let Some(store) = self.namespace(namespace) else {
            return Ok(IndexStats::default());
        };

        let now = self.clock.now_millis();
        let (total_documents, index_size_bytes) = store
            .records
            .iter()
            .filter(|entry| entry.is_live(now))
            .fold((0u64, 0u64), |(count, bytes), entry| {
                let size = serde_json::to_vec(&entry.record.source)
                    .map(|v| v.len() as u64)
                    .unwrap_or(0);
                (count + 1, bytes + size)
            });

        let last_write = store.last_write.load(Ordering::SeqCst);
        Ok(IndexStats {
            total_documents,
            index_size_bytes,
            num_segments: usize::from(total_documents > 0),
            last_commit: (last_write > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_write))
                .flatten(),
        })
    }
}

/// A clause with its patterns compiled
enum Matcher<'a> {
    MatchAll,
    MatchNone,
    Type(&'a str),
    Id(&'a str),
    FullText(Vec<String>),
    Keyword(&'a str, &'a str),
    KeywordIn(&'a str, &'a [String]),
    Prefix(&'a str, &'a str),
    Wildcard(&'a str, Regex),
    Tag(&'a str),
    Similar(&'a [String], &'a [String]),
    GeoBox(BoundingBox),
    After(&'a ObjectKey),
    All(Vec<Matcher<'a>>),
    Any(Vec<Matcher<'a>>),
    Not(Box<Matcher<'a>>),
}

impl<'a> Matcher<'a> {
    fn compile(clause: &'a Clause) -> SearchResult<Self> {
        Ok(match clause {
            Clause::MatchAll => Matcher::MatchAll,
            Clause::MatchNone => Matcher::MatchNone,
            Clause::Type(t) => Matcher::Type(t),
            Clause::Id(id) => Matcher::Id(id),
            Clause::FullText(text) => {
                let tokens: HashSet<String> = text
                    .split_whitespace()
                    .filter(|word| !matches!(*word, "AND" | "OR" | "NOT"))
                    .flat_map(tokenize)
                    .collect();
                Matcher::FullText(tokens.into_iter().collect())
            }
            Clause::Keyword { field, value } => Matcher::Keyword(field, value),
            Clause::KeywordIn { field, values } => Matcher::KeywordIn(field, values),
            Clause::Prefix { field, prefix } => Matcher::Prefix(field, prefix),
            Clause::Wildcard { field, pattern } => {
                let regex = Regex::new(&format!("^{}$", glob_to_regex(pattern))).map_err(|e| {
                    SearchError::Validation(format!("Invalid wildcard pattern '{}': {}", pattern, e))
                })?;
                Matcher::Wildcard(field, regex)
            }
            Clause::Tag(tag) => Matcher::Tag(tag),
            Clause::Similar { fields, tokens } => Matcher::Similar(fields, tokens),
            Clause::GeoBox(bbox) => Matcher::GeoBox(*bbox),
            Clause::After(key) => Matcher::After(key),
            Clause::All(clauses) => Matcher::All(
                clauses
                    .iter()
                    .map(Matcher::compile)
                    .collect::<SearchResult<_>>()?,
            ),
            Clause::Any(clauses) => Matcher::Any(
                clauses
                    .iter()
                    .map(Matcher::compile)
                    .collect::<SearchResult<_>>()?,
            ),
            Clause::Not(inner) => Matcher::Not(Box::new(Matcher::compile(inner)?)),
        })
    }

    /// Score of a matching record, `None` when it does not match
    fn score(&self, record: &IndexRecord) -> Option<f32> {
        match self {
            Matcher::MatchAll => Some(0.0),
            Matcher::MatchNone => None,
            Matcher::Type(t) => filter(record.key.object_type == *t),
            Matcher::Id(id) => filter(record.key.id == *id),
            Matcher::FullText(tokens) => {
                let text: HashSet<String> = tokenize(&record.full_text).into_iter().collect();
                let matched = tokens.iter().filter(|t| text.contains(*t)).count();
                (matched > 0).then_some(matched as f32)
            }
            Matcher::Keyword(field, value) => filter(has_keyword(record, field, |v| v == *value)),
            Matcher::KeywordIn(field, values) => filter(has_keyword(record, field, |v| {
                values.iter().any(|value| value == v)
            })),
            Matcher::Prefix(field, prefix) => {
                filter(has_keyword(record, field, |v| v.starts_with(*prefix)))
            }
            Matcher::Wildcard(field, regex) => {
                filter(has_keyword(record, field, |v| regex.is_match(v)))
            }
            Matcher::Tag(tag) => filter(record.tags.iter().any(|t| t.as_str() == *tag)),
            Matcher::Similar(fields, tokens) => {
                let matched = record
                    .tokens
                    .iter()
                    .filter(|(f, t)| fields.contains(f) && tokens.contains(t))
                    .count();
                (matched > 0).then_some(matched as f32)
            }
            Matcher::GeoBox(bbox) => filter(record.location.map_or(false, |p| bbox.contains(p))),
            Matcher::After(key) => filter(record.key > **key),
            Matcher::All(matchers) => matchers
                .iter()
                .try_fold(0.0, |total, m| m.score(record).map(|s| total + s)),
            Matcher::Any(matchers) => {
                let scores: Vec<f32> = matchers.iter().filter_map(|m| m.score(record)).collect();
                (!scores.is_empty()).then(|| scores.iter().sum())
            }
            Matcher::Not(inner) => filter(inner.score(record).is_none()),
        }
    }
}

/// Zero score for a matching filter
fn filter(matched: bool) -> Option<f32> {
    matched.then_some(0.0)
}

fn has_keyword(record: &IndexRecord, field: &str, pred: impl Fn(&str) -> bool) -> bool {
    record
        .keywords
        .iter()
        .any(|(f, v)| f == field && pred(v.as_str()))
}
