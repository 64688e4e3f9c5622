//! Engines behind the search facade

pub mod clock;
pub mod factory;
pub mod memory;
pub mod tantivy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use factory::{create_backend, create_in_memory_backend};
pub use memory::InMemoryBackend;
pub use self::tantivy::TantivyBackend;

use crate::error::SearchResult;
use crate::models::{GeoPoint, ObjectKey};
use crate::search::document::IndexRecord;
use crate::search::query::Clause;
use crate::search::tenant::Namespace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A matching record as returned by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub key: ObjectKey,

    /// Backend relevance score; only comparable within one query
    pub score: f32,

    /// Stored source the caller's type is hydrated from
    pub source: Value,

    pub location: Option<GeoPoint>,
}

/// Order in which a backend returns the first matches of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitSort {
    /// Descending score, ties by ascending key
    Score,
    /// Ascending key
    Key,
}

/// First matches of a query, plus the number of all matches
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub hits: Vec<RawHit>,
    pub total: u64,
}

/// A record a backend could not write or remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub key: ObjectKey,
    pub reason: String,
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Live (unexpired) documents in the namespace
    pub total_documents: u64,

    /// Index size in bytes
    pub index_size_bytes: u64,

    /// Number of segments
    pub num_segments: usize,

    /// Last commit timestamp
    pub last_commit: Option<DateTime<Utc>>,
}

/// Storage and matching for tenant namespaces.
///
/// Backends own write serialization and expiry: records carrying a TTL are
/// hidden from every read once their deadline passes on the backend's clock.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Insert or replace records; returns the ones that failed
    async fn upsert(
        &self,
        namespace: &Namespace,
        records: Vec<IndexRecord>,
    ) -> SearchResult<Vec<RecordFailure>>;

    /// Remove records; missing keys are not failures
    async fn delete(
        &self,
        namespace: &Namespace,
        keys: &[ObjectKey],
    ) -> SearchResult<Vec<RecordFailure>>;

    /// The first `limit` matches of `clause` in `sort` order
    async fn search(
        &self,
        namespace: &Namespace,
        clause: &Clause,
        sort: HitSort,
        limit: usize,
    ) -> SearchResult<Candidates>;

    /// Number of matches, or `None` if the backend cannot tell
    async fn count(&self, namespace: &Namespace, clause: &Clause) -> SearchResult<Option<u64>>;

    /// Make all previous writes visible
    async fn refresh(&self, namespace: &Namespace) -> SearchResult<()>;

    /// Remove every record of the namespace
    async fn clear(&self, namespace: &Namespace) -> SearchResult<()>;

    async fn stats(&self, namespace: &Namespace) -> SearchResult<IndexStats>;
}
