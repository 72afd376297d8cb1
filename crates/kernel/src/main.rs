//! Listing kernel CLI
//!
//! Explains how a listing request is composed against a schema, or runs it
//! against PostgreSQL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use listing_kernel::{
    EntityRepository, ExplainExecutor, ListRequest, ListingConfig, PgExecutor,
    ResourceCollection, SchemaRegistry,
};

#[derive(Parser)]
#[command(name = "listing", about = "Compose collection listing queries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a schema file and list its entities.
    Schema {
        /// Path to the schema TOML file.
        #[arg(long)]
        schema: PathBuf,
    },
    /// Print the count and page SQL a request composes to.
    Explain {
        /// Path to the schema TOML file.
        #[arg(long)]
        schema: PathBuf,
        /// Root entity to list.
        #[arg(long)]
        entity: String,
        /// Request query string, e.g. "filter[title]=rust&sort=-created".
        #[arg(long, default_value = "")]
        query: String,
        /// Base URL used to render pagination links.
        #[arg(long)]
        base_url: Option<url::Url>,
    },
    /// Run a request against DATABASE_URL and print a JSON:API document.
    List {
        /// Path to the schema TOML file.
        #[arg(long)]
        schema: PathBuf,
        /// Root entity to list.
        #[arg(long)]
        entity: String,
        /// Request query string.
        #[arg(long, default_value = "")]
        query: String,
        /// Base URL used to render pagination links.
        #[arg(long)]
        base_url: url::Url,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = ListingConfig::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Schema { schema } => {
            let registry = load_schema(&schema)?;
            info!(entities = registry.len(), "Schema loaded");
            let mut names: Vec<String> = registry_names(&registry);
            names.sort();
            for name in names {
                println!("{name}");
            }
        }
        Command::Explain {
            schema,
            entity,
            query,
            base_url,
        } => {
            let registry = Arc::new(load_schema(&schema)?);
            let repository = EntityRepository::new(registry, &entity)?;
            let executor = Arc::new(ExplainExecutor::new());
            let request = ListRequest::from_query_string(&query);

            let mut collection =
                ResourceCollection::new(repository, request, &config, executor.clone())?;
            collection.handle_index_request().await?;

            for sql in executor.statements() {
                println!("{sql};");
            }
            if let Some(base) = base_url
                && let Some(links) = collection.link_urls(&base)
            {
                println!("{}", serde_json::to_string_pretty(&links)?);
            }
        }
        Command::List {
            schema,
            entity,
            query,
            base_url,
        } => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL environment variable is required")?;
            let executor =
                PgExecutor::connect(database_url, config.database_max_connections).await?;
            info!(entity = %entity, "Connected to PostgreSQL");

            let registry = Arc::new(load_schema(&schema)?);
            let repository = EntityRepository::new(registry, &entity)?;
            let request = ListRequest::from_query_string(&query);

            let mut collection =
                ResourceCollection::new(repository, request, &config, Arc::new(executor))?;
            collection.handle_index_request().await?;

            let data: Vec<serde_json::Value> =
                collection.take_items().into_iter().flatten().collect();
            let document = serde_json::json!({
                "data": data,
                "meta": {
                    "total": collection.total_items(),
                    "page": collection.page(),
                    "size": collection.size(),
                },
                "links": collection.link_urls(&base_url),
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }

    Ok(())
}

fn load_schema(path: &Path) -> Result<SchemaRegistry> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema {}", path.display()))?;
    SchemaRegistry::from_toml(&source)
}

fn registry_names(registry: &SchemaRegistry) -> Vec<String> {
    registry.entity_names().map(str::to_string).collect()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
