use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use movie_catalog::admin::backfill::{self, BackfillOptions, DEFAULT_DELAY_MS};
use movie_catalog::admin::delete::{self, DeleteOutcome, DeleteTarget};
use movie_catalog::admin::import::{self, DEFAULT_IMPORT_FILE};
use movie_catalog::admin::AdminContext;
use movie_catalog::client::CatalogClient;
use movie_catalog::config::AppConfig;
use movie_catalog::mcp::McpServer;

#[derive(Parser)]
#[command(name = "catalog-admin", about = "Movie catalog administration tools")]
struct Cli {
    /// Collection to operate on (defaults to the configured one)
    #[arg(long, global = true)]
    collection: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import records from a JSON array or id-keyed object
    Import {
        #[arg(long, default_value = DEFAULT_IMPORT_FILE)]
        file: PathBuf,
        /// Record field to use as the document id
        #[arg(long)]
        id_field: Option<String>,
    },
    /// Delete records by id, or by exact title and year
    Delete {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill in missing poster links through the findMovie endpoint
    BackfillPosters {
        #[arg(long)]
        limit: Option<usize>,
        /// Overwrite existing poster links
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
        /// Milliseconds to wait between lookups
        #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
        delay: u64,
        /// Catalog API base URL
        #[arg(long)]
        api_url: Option<String>,
    },
    /// Run the MCP server on stdin/stdout
    Mcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output (and the MCP protocol), logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load();
    let context = AdminContext::resolve(&config)?;
    let collection = cli
        .collection
        .clone()
        .unwrap_or_else(|| config.collection.clone());

    match cli.command {
        Command::Import { file, id_field } => {
            context.announce(&collection);
            let batch = import::read_records(&file, id_field.as_deref())?;
            let store = context.open_store(&collection).await?;
            import::run(&store, &batch).await?;
        }
        Command::Delete {
            id,
            title,
            year,
            dry_run,
        } => {
            let Some(target) = DeleteTarget::from_args(id, title, year) else {
                bail!("Provide --id OR both --title and --year");
            };
            context.announce(&collection);
            let store = context.open_store(&collection).await?;
            if delete::run(&store, &target, dry_run).await? == DeleteOutcome::NothingFound {
                std::process::exit(2);
            }
        }
        Command::BackfillPosters {
            limit,
            force,
            dry_run,
            delay,
            api_url,
        } => {
            context.announce(&collection);
            let api_url = api_url
                .or_else(|| config.admin.api_base_url.clone())
                .unwrap_or_else(|| config.local_api_url());
            println!("Lookup API: {}", api_url);

            let client = CatalogClient::new(
                api_url,
                Duration::from_secs(config.enrichment.timeout_secs),
            )?;
            let store = context.open_store(&collection).await?;
            let options = BackfillOptions {
                limit,
                force,
                dry_run,
                delay: Duration::from_millis(delay),
            };
            backfill::run(&store, &client, &options).await?;
        }
        Command::Mcp => {
            tracing::info!(
                "MCP server for project {} ({}), collection {}",
                context.project,
                context.credentials,
                collection
            );
            let store = context.open_store(&collection).await?;
            McpServer::new(Arc::new(store)).serve_stdio().await?;
        }
    }

    Ok(())
}
