use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use folio::analytics::models::{Interval, StatsFilter};
use folio::analytics::{Aggregator, AggregateCache, SeriesEngine, SystemClock};
use folio::config::{Config, DatabaseBackend};
use folio::storage::{PostgresStorage, SqliteStorage, ViewStore};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "folio-admin")]
#[command(about = "Folio view analytics operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the analytics tables and indexes
    Init,
    /// Print aggregate view statistics as JSON
    Stats {
        /// Restrict to one page; all pages when omitted
        #[arg(long)]
        page: Option<String>,
    },
    /// Print a bucketed view series as JSON
    Series {
        /// Range start (RFC3339)
        #[arg(long)]
        start: DateTime<Utc>,
        /// Range end (RFC3339)
        #[arg(long)]
        end: DateTime<Utc>,
        #[arg(long)]
        page: Option<String>,
        /// hour or day
        #[arg(long, default_value = "day")]
        interval: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn ViewStore> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    let settings = config.analytics_settings()?;

    match cli.command {
        Commands::Init => {
            println!("✓ Analytics schema is ready");
        }
        Commands::Stats { page } => {
            let aggregator = Aggregator::new(
                Arc::clone(&storage),
                Arc::new(AggregateCache::new(&settings.cache)),
                Arc::new(SystemClock),
                settings.zone,
            );
            let aggregate = aggregator
                .get_stats_filtered(&StatsFilter::page(page.as_deref()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&aggregate)?);
        }
        Commands::Series {
            start,
            end,
            page,
            interval,
        } => {
            let engine = SeriesEngine::new(Arc::clone(&storage), settings.zone);
            let points = engine
                .series_between(page.as_deref(), start, end, Interval::parse_lossy(&interval))
                .await
                .context("failed to compute series")?;
            println!("{}", serde_json::to_string_pretty(&points)?);
        }
    }

    Ok(())
}
