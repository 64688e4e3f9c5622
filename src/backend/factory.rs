use crate::backend::{InMemoryBackend, SearchBackend, TantivyBackend};
use crate::error::SearchResult;
use crate::search::config::{BackendKind, SearchConfig};
use std::sync::Arc;

/// Create a search backend based on configuration
pub fn create_backend(config: &SearchConfig) -> SearchResult<Arc<dyn SearchBackend>> {
    match config.backend {
        BackendKind::Tantivy => {
            match &config.index_path {
                Some(path) => tracing::info!(path = ?path, "Initializing tantivy search backend"),
                None => tracing::info!("Initializing in-RAM tantivy search backend"),
            }

            let backend = TantivyBackend::new(config.clone())?;
            Ok(Arc::new(backend))
        }

        BackendKind::InMemory => Ok(create_in_memory_backend()),
    }
}

/// Create an in-memory backend (for testing and development)
pub fn create_in_memory_backend() -> Arc<dyn SearchBackend> {
    tracing::info!("Initializing in-memory search backend");
    Arc::new(InMemoryBackend::new())
}
