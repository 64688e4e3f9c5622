//! Multi-tenant indexing and query layer
//!
//! `tenant-search` mirrors domain objects into one search namespace per
//! application and answers full-text, prefix, wildcard, term, tag,
//! similarity and geo queries with cursor-stable pagination.
//!
//! See [`search::SearchService`] for the public operations and
//! [`backend`] for the engines behind them.

pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod search;

pub use backend::{Clock, InMemoryBackend, ManualClock, SearchBackend, SystemClock, TantivyBackend};
pub use error::{SearchError, SearchResult};
pub use models::{Document, GeoPoint, ObjectKey, Pager, Searchable};
pub use search::{BatchReport, ResultSet, SearchConfig, SearchQuery, SearchService};
