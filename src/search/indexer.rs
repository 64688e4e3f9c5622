//! Indexing engine: single and batched writes into a namespace

use crate::backend::{RecordFailure, SearchBackend};
use crate::error::{SearchError, SearchResult};
use crate::metrics;
use crate::models::ObjectKey;
use crate::search::document::IndexRecord;
use crate::search::tenant::Namespace;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An object a batch operation could not apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Type of the object (may be blank if that was the problem)
    pub object_type: String,
    /// Id of the object (may be blank if that was the problem)
    pub id: String,
    pub reason: String,
}

impl From<RecordFailure> for BatchFailure {
    fn from(failure: RecordFailure) -> Self {
        Self {
            object_type: failure.key.object_type,
            id: failure.key.id,
            reason: failure.reason,
        }
    }
}

/// Outcome of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Objects handed in
    pub requested: usize,
    /// Objects applied
    pub succeeded: usize,
    /// Objects not applied, with the reason
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_keys(&self) -> Vec<ObjectKey> {
        self.failures
            .iter()
            .map(|f| ObjectKey::new(f.object_type.clone(), f.id.clone()))
            .collect()
    }
}

/// Writes and removes records, chunking batches
#[derive(Clone)]
pub struct Indexer {
    backend: Arc<dyn SearchBackend>,
    batch_size: usize,
    batch_concurrency: usize,
}

impl Indexer {
    pub fn new(backend: Arc<dyn SearchBackend>, batch_size: usize, batch_concurrency: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Upsert one record; any failure is an error
    pub async fn index(&self, namespace: &Namespace, record: IndexRecord) -> SearchResult<()> {
        let key = record.key.clone();
        let failures = self.backend.upsert(namespace, vec![record]).await?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(SearchError::Backend(failure.reason));
        }

        tracing::debug!(
            namespace = %namespace,
            object_type = %key.object_type,
            id = %key.id,
            "Object indexed"
        );
        Ok(())
    }

    /// Remove one record; missing records are fine
    pub async fn unindex(&self, namespace: &Namespace, key: ObjectKey) -> SearchResult<()> {
        let failures = self
            .backend
            .delete(namespace, std::slice::from_ref(&key))
            .await?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(SearchError::Backend(failure.reason));
        }

        tracing::debug!(
            namespace = %namespace,
            object_type = %key.object_type,
            id = %key.id,
            "Object unindexed"
        );
        Ok(())
    }

    /// Upsert many records; `rejected` are objects that failed projection
    pub async fn index_all(
        &self,
        namespace: &Namespace,
        records: Vec<IndexRecord>,
        rejected: Vec<BatchFailure>,
    ) -> BatchReport {
        let requested = records.len() + rejected.len();
        let chunks = chunk(records, self.batch_size);

        let outcomes: Vec<Vec<BatchFailure>> = stream::iter(chunks)
            .map(|chunk| async move {
                let keys: Vec<ObjectKey> = chunk.iter().map(|r| r.key.clone()).collect();
                match self.backend.upsert(namespace, chunk).await {
                    Ok(failures) => failures.into_iter().map(BatchFailure::from).collect(),
                    Err(e) => fail_all(keys, &e),
                }
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        self.report(namespace, "index_all", requested, rejected, outcomes)
    }

    /// Remove many records
    pub async fn unindex_all(
        &self,
        namespace: &Namespace,
        keys: Vec<ObjectKey>,
        rejected: Vec<BatchFailure>,
    ) -> BatchReport {
        let requested = keys.len() + rejected.len();
        let chunks = chunk(keys, self.batch_size);

        let outcomes: Vec<Vec<BatchFailure>> = stream::iter(chunks)
            .map(|chunk| async move {
                match self.backend.delete(namespace, &chunk).await {
                    Ok(failures) => failures.into_iter().map(BatchFailure::from).collect(),
                    Err(e) => fail_all(chunk, &e),
                }
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        self.report(namespace, "unindex_all", requested, rejected, outcomes)
    }

    fn report(
        &self,
        namespace: &Namespace,
        operation: &str,
        requested: usize,
        mut failures: Vec<BatchFailure>,
        outcomes: Vec<Vec<BatchFailure>>,
    ) -> BatchReport {
        failures.extend(outcomes.into_iter().flatten());
        failures.sort_by(|a, b| (&a.object_type, &a.id).cmp(&(&b.object_type, &b.id)));

        let report = BatchReport {
            requested,
            succeeded: requested.saturating_sub(failures.len()),
            failures,
        };

        if report.is_complete() {
            tracing::debug!(namespace = %namespace, operation, count = requested, "Batch applied");
        } else {
            metrics::BATCH_FAILURES_TOTAL
                .with_label_values(&[operation, self.backend.name()])
                .inc_by(report.failures.len() as u64);
            tracing::warn!(
                namespace = %namespace,
                operation,
                requested,
                failed = report.failures.len(),
                failures = ?report.failures,
                "Batch partially applied"
            );
        }

        report
    }
}

fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len() / size + 1);
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        chunks.push(items.by_ref().take(size).collect());
    }
    chunks
}

fn fail_all(keys: Vec<ObjectKey>, error: &SearchError) -> Vec<BatchFailure> {
    tracing::error!(error = %error, count = keys.len(), "Batch chunk failed");
    keys.into_iter()
        .map(|key| BatchFailure {
            object_type: key.object_type,
            id: key.id,
            reason: error.to_string(),
        })
        .collect()
}
