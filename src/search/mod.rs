//! Tenant-scoped indexing and querying
//!
//! Domain objects implementing [`Searchable`](crate::models::Searchable) are
//! projected into [`IndexRecord`]s and written to one namespace per app id.
//! Queries are expressed as [`SearchQuery`] shapes, translated into a
//! backend-neutral [`Clause`] tree and executed by whichever
//! [`SearchBackend`](crate::backend::SearchBackend) is configured.
//!
//! ```text
//! SearchService ──► TenantResolver ──► Namespace
//!      │
//!      ├── Indexer ────────┐
//!      ├── QueryExecutor ──┼──► SearchBackend (tantivy | in-memory)
//!      └── CountEngine ────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tenant_search::models::{Document, Pager};
//! use tenant_search::search::{SearchConfig, SearchService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SearchConfig::builder().default_app_id("main").build();
//!     let search = SearchService::new(config)?;
//!
//!     let user = Document::new("user", "u1").with_field("name", "Alice Smith");
//!     search.index(None, &user).await?;
//!
//!     let mut pager = Pager::new(20);
//!     let results = search
//!         .find_query::<Document>(None, Some("user"), "alice", &mut pager)
//!         .await?;
//!     println!("Found {} users", results.total_count);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod count;
pub mod document;
pub mod executor;
pub mod geo;
pub mod indexer;
pub mod paging;
pub mod query;
pub mod service;
pub mod tenant;

pub use config::{BackendKind, SearchConfig, SearchConfigBuilder};
pub use document::IndexRecord;
pub use indexer::{BatchFailure, BatchReport};
pub use query::{Clause, QueryShape, SearchQuery, Terms};
pub use service::{ResultSet, SearchService};
pub use tenant::{Namespace, TenantResolver};
