use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tenant_search::{
    config::Config,
    models::{Document, Pager},
    search::{ResultSet, SearchService, Terms},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tenant-search")]
#[command(about = "Operate tenant search indexes", long_about = None, version)]
struct Cli {
    /// Configuration file overriding the built-in defaults
    #[arg(short, long, env = "TENANT_SEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// App id of the tenant to operate on (default: configured default tenant)
    #[arg(short, long, global = true)]
    app: Option<String>,

    /// Index directory, overriding the configured one
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index one document or a JSON array of documents
    Index {
        /// JSON file holding `{"id": .., "type": .., ...}` objects
        #[arg(short, long)]
        file: PathBuf,

        /// Expire the documents after this many milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
    },

    /// Remove a document
    Unindex {
        #[arg(short = 't', long = "type")]
        object_type: String,

        #[arg(value_name = "ID")]
        id: String,
    },

    /// Get a document by id
    Get {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Full-text query
    Query {
        #[arg(value_name = "QUERY", default_value = "*")]
        text: String,

        #[arg(short = 't', long = "type")]
        object_type: Option<String>,

        #[command(flatten)]
        paging: PagingArgs,
    },

    /// Prefix query on one field
    Prefix {
        #[arg(value_name = "FIELD")]
        field: String,

        #[arg(value_name = "PREFIX")]
        prefix: String,

        #[arg(short = 't', long = "type")]
        object_type: Option<String>,

        #[command(flatten)]
        paging: PagingArgs,
    },

    /// Count documents of a type
    Count {
        #[arg(short = 't', long = "type")]
        object_type: Option<String>,

        /// Required field value, as `field=value` (repeatable)
        #[arg(long = "term", value_parser = parse_term)]
        terms: Vec<(String, String)>,
    },

    /// Show index statistics
    Stats,
}

#[derive(clap::Args)]
struct PagingArgs {
    #[arg(short = 's', long, default_value = "20")]
    page_size: usize,

    #[arg(short, long, default_value = "1")]
    page: u64,

    /// Field to sort by
    #[arg(long)]
    sort: Option<String>,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    /// Cursor returned by a previous page
    #[arg(long)]
    cursor: Option<String>,
}

impl PagingArgs {
    fn pager(&self) -> Pager {
        let mut pager = Pager::new(self.page_size).with_page(self.page);
        if let Some(sort) = &self.sort {
            pager = pager.with_sort(sort.clone(), !self.desc);
        }
        if let Some(cursor) = &self.cursor {
            pager = pager.with_cursor(cursor.clone());
        }
        pager
    }
}

fn parse_term(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected field=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(&path.to_string_lossy()),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(path) = &cli.index_path {
        config.search.index_path = Some(path.clone());
    }
    let json_logs = cli.json_logs || config.observability.json_logs;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("tenant_search={}", config.observability.log_level).into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    if config.observability.prometheus_enabled {
        if let Err(e) = tenant_search::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    tracing::debug!(backend = ?config.search.backend, index_path = ?config.search.index_path, "Opening search service");
    let service = SearchService::new(config.search.clone()).context("Failed to open search service")?;
    let app = cli.app.as_deref();

    let output = match cli.command {
        Commands::Index { file, ttl_ms } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let documents = parse_documents(&raw)?;

            match ttl_ms {
                Some(ttl) => {
                    let ttl = Duration::from_millis(ttl);
                    for document in &documents {
                        service.index_with_ttl(app, document, ttl).await?;
                    }
                    json!({ "indexed": documents.len(), "failures": [] })
                }
                None => {
                    let report = service.index_all(app, &documents).await?;
                    json!({ "indexed": report.succeeded, "failures": report.failures })
                }
            }
        }
        Commands::Unindex { object_type, id } => {
            service.unindex(app, &Document::new(object_type, id)).await?;
            json!({ "unindexed": true })
        }
        Commands::Get { id } => {
            let document: Option<Document> = service.find_by_id(app, &id).await?;
            serde_json::to_value(document)?
        }
        Commands::Query {
            text,
            object_type,
            paging,
        } => {
            let mut pager = paging.pager();
            let results = service
                .find_query::<Document>(app, object_type.as_deref(), &text, &mut pager)
                .await?;
            page_json(results)?
        }
        Commands::Prefix {
            field,
            prefix,
            object_type,
            paging,
        } => {
            let mut pager = paging.pager();
            let results = service
                .find_prefix::<Document>(app, object_type.as_deref(), &field, &prefix, &mut pager)
                .await?;
            page_json(results)?
        }
        Commands::Count { object_type, terms } => {
            let terms: Terms = terms
                .into_iter()
                .map(|(field, value)| (field, Value::String(value)))
                .collect();
            let terms = (!terms.is_empty()).then_some(terms);
            let count = service
                .get_count(app, object_type.as_deref(), terms.as_ref())
                .await?;
            json!({ "count": count })
        }
        Commands::Stats => serde_json::to_value(service.stats(app).await?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_documents(raw: &str) -> anyhow::Result<Vec<Document>> {
    let value: Value = serde_json::from_str(raw).context("Input is not valid JSON")?;
    let documents = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(_) => vec![serde_json::from_value(value)?],
        other => bail!("Expected a JSON object or array, got {}", other),
    };
    Ok(documents)
}

fn page_json(results: ResultSet<Document>) -> anyhow::Result<Value> {
    Ok(json!({
        "total_count": results.total_count,
        "next_cursor": results.next_cursor,
        "dropped": results.dropped,
        "items": serde_json::to_value(results.items)?,
    }))
}
