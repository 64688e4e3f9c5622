//! Search configuration

use crate::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Smallest per-thread writer arena tantivy accepts
pub const MIN_WRITER_HEAP_PER_THREAD: usize = 15_000_000;

/// Engine behind the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One tantivy index per tenant namespace
    Tantivy,
    /// Process-local maps, for tests and embedding
    InMemory,
}

/// Search service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SearchConfig {
    /// Engine to use
    pub backend: BackendKind,

    /// Directory holding one sub-directory per namespace (tantivy keeps
    /// indexes in RAM when unset)
    pub index_path: Option<PathBuf>,

    /// Index writer heap size in bytes (default: 50MB)
    #[validate(range(min = 15_000_000))]
    pub writer_heap_size: usize,

    /// Number of threads for indexing
    #[validate(range(min = 1, max = 64))]
    pub indexing_threads: usize,

    /// Commit and reload after every write so changes are visible at once
    pub realtime_indexing: bool,

    /// Page size applied when a pager asks for none
    #[validate(range(min = 1, max = 10_000))]
    pub default_page_size: usize,

    /// Upper bound page sizes are clamped to
    #[validate(range(min = 1, max = 10_000))]
    pub max_page_size: usize,

    /// Candidates fetched in a query's first round; later rounds double it
    #[validate(range(min = 1, max = 1_000_000))]
    pub scan_window: usize,

    /// Objects per backend write in batch operations
    #[validate(range(min = 1, max = 100_000))]
    pub batch_size: usize,

    /// Batch chunks written concurrently
    #[validate(range(min = 1, max = 64))]
    pub batch_concurrency: usize,

    /// App id used when a call names no tenant
    pub default_app_id: Option<String>,

    /// Prefix prepended to app ids to form namespaces
    #[validate(length(max = 32))]
    pub namespace_prefix: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tantivy,
            index_path: None,
            writer_heap_size: 50_000_000, // 50MB
            indexing_threads: 1,
            realtime_indexing: true,
            default_page_size: 30,
            max_page_size: 500,
            scan_window: 1_000,
            batch_size: 100,
            batch_concurrency: 4,
            default_app_id: None,
            namespace_prefix: "tenant-".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::new()
    }

    /// Check field ranges and the constraints spanning several fields
    pub fn validate_settings(&self) -> SearchResult<()> {
        self.validate()?;

        if self.default_page_size > self.max_page_size {
            return Err(SearchError::Configuration(format!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }

        if self.backend == BackendKind::Tantivy
            && self.writer_heap_size / self.indexing_threads < MIN_WRITER_HEAP_PER_THREAD
        {
            return Err(SearchError::Configuration(format!(
                "writer_heap_size must provide at least {} bytes per indexing thread",
                MIN_WRITER_HEAP_PER_THREAD
            )));
        }

        Ok(())
    }
}

/// Builder for SearchConfig
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn index_path(mut self, path: PathBuf) -> Self {
        self.config.index_path = Some(path);
        self
    }

    pub fn writer_heap_size(mut self, size: usize) -> Self {
        self.config.writer_heap_size = size;
        self
    }

    pub fn indexing_threads(mut self, threads: usize) -> Self {
        self.config.indexing_threads = threads;
        self
    }

    pub fn realtime_indexing(mut self, enabled: bool) -> Self {
        self.config.realtime_indexing = enabled;
        self
    }

    pub fn default_page_size(mut self, size: usize) -> Self {
        self.config.default_page_size = size;
        self
    }

    pub fn max_page_size(mut self, size: usize) -> Self {
        self.config.max_page_size = size;
        self
    }

    pub fn scan_window(mut self, size: usize) -> Self {
        self.config.scan_window = size;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn batch_concurrency(mut self, concurrency: usize) -> Self {
        self.config.batch_concurrency = concurrency;
        self
    }

    pub fn default_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.default_app_id = Some(app_id.into());
        self
    }

    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.namespace_prefix = prefix.into();
        self
    }

    pub fn build(self) -> SearchConfig {
        self.config
    }
}

impl Default for SearchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SearchConfig::default().validate_settings().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SearchConfigBuilder::new()
            .backend(BackendKind::InMemory)
            .default_app_id("acme")
            .max_page_size(50)
            .default_page_size(10)
            .build();

        assert_eq!(config.backend, BackendKind::InMemory);
        assert_eq!(config.default_app_id.as_deref(), Some("acme"));
        assert_eq!(config.max_page_size, 50);
        assert!(config.validate_settings().is_ok());
    }

    #[test]
    fn test_page_size_constraints() {
        let config = SearchConfig {
            default_page_size: 100,
            max_page_size: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate_settings(),
            Err(SearchError::Configuration(_))
        ));
    }

    #[test]
    fn test_writer_heap_per_thread() {
        let config = SearchConfig {
            writer_heap_size: 20_000_000,
            indexing_threads: 2,
            ..Default::default()
        };
        assert!(config.validate_settings().is_err());

        let in_memory = SearchConfig {
            backend: BackendKind::InMemory,
            ..config
        };
        assert!(in_memory.validate_settings().is_ok());
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"backend": "in_memory", "batch_size": 7}"#).unwrap();
        assert_eq!(config.backend, BackendKind::InMemory);
        assert_eq!(config.batch_size, 7);
        assert_eq!(config.scan_window, 1_000);
    }
}
