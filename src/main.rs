use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use noctua::config::Config;
use noctua::ingest::Ingestor;
use noctua::storage::{Database, DatabaseError};
use noctua::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "noctua",
    version,
    about = "Fetches RSS/Atom feeds, filters entries and stores articles in SQLite"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, value_name = "FILE", default_value = "noctua.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve the HTTP trigger endpoint (default)
    Serve,
    /// Run one ingestion pass and print the report as JSON
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let records = config
        .feed_records()
        .context("Invalid feed configuration")?;

    let db = match Database::open(&config.ingest.database_path).await {
        Ok(db) => db,
        Err(DatabaseError::Locked) => {
            anyhow::bail!(
                "Database {} is locked by another process",
                config.ingest.database_path
            );
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    db.sync_feeds(&records)
        .await
        .context("Failed to sync feeds")?;
    let registry = db.list_feeds().await.context("Failed to read feed registry")?;
    let enabled = registry.iter().filter(|f| f.enabled).count();
    tracing::info!(
        enabled,
        disabled = registry.len() - enabled,
        "Feed registry synced"
    );

    let ingestor =
        Ingestor::new(db, config.ingest_settings()).context("Failed to build HTTP client")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Run => {
            let report = ingestor.run().await.context("Ingestion run failed")?;
            let json =
                serde_json::to_string_pretty(&report).context("Failed to encode run report")?;
            println!("{}", json);
        }
        Command::Serve => {
            let state = AppState {
                ingestor,
                secret: config.trigger_secret(),
            };
            web::serve(&config.server.bind, state)
                .await
                .with_context(|| format!("Failed to serve on {}", config.server.bind))?;
        }
    }

    Ok(())
}
