use thiserror::Error;

/// Errors raised by indexing, query and count operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// Fatal misconfiguration (unset default tenant, unsafe app id, bad settings)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller supplied something unusable (missing id/type, bad shape parameters)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient backend failure; the caller may retry
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Non-transient backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::BackendUnavailable(_) | SearchError::Io(_))
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            SearchError::Configuration(_) => "CONFIGURATION_ERROR",
            SearchError::Validation(_) => "VALIDATION_ERROR",
            SearchError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            SearchError::Backend(_) => "BACKEND_ERROR",
            SearchError::Serialization(_) => "SERIALIZATION_ERROR",
            SearchError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        use tantivy::TantivyError;

        match err {
            TantivyError::LockFailure(..) | TantivyError::IoError(_) => {
                SearchError::BackendUnavailable(err.to_string())
            }
            TantivyError::InvalidArgument(msg) => SearchError::Validation(msg),
            _ => SearchError::Backend(err.to_string()),
        }
    }
}

impl From<tantivy::query::QueryParserError> for SearchError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        SearchError::Validation(format!("Query parsing failed: {}", err))
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for SearchError {
    fn from(err: validator::ValidationErrors) -> Self {
        SearchError::Configuration(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for SearchError {
    fn from(err: config::ConfigError) -> Self {
        SearchError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type SearchResult<T> = std::result::Result<T, SearchError>;
