//! Count engine

use crate::backend::SearchBackend;
use crate::error::SearchResult;
use crate::search::query::{QueryTranslator, SearchQuery, Terms};
use crate::search::tenant::Namespace;
use std::sync::Arc;

/// Counts matches without materializing them
#[derive(Clone)]
pub struct CountEngine {
    backend: Arc<dyn SearchBackend>,
    translator: QueryTranslator,
}

impl CountEngine {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            translator: QueryTranslator::new(),
        }
    }

    /// Objects of `object_type` (all types when `None`) matching every term
    pub async fn count(
        &self,
        namespace: &Namespace,
        object_type: Option<&str>,
        terms: Option<&Terms>,
    ) -> SearchResult<Option<u64>> {
        let mut query = match terms {
            Some(terms) => SearchQuery::terms(terms.clone(), true),
            None => SearchQuery::text("*"),
        };
        query.object_type = object_type.map(str::to_string);

        let plan = self.translator.translate(&query)?;
        let count = self.backend.count(namespace, &plan.clause).await?;

        tracing::debug!(
            namespace = %namespace,
            object_type = ?object_type,
            count = ?count,
            "Count executed"
        );
        Ok(count)
    }
}
