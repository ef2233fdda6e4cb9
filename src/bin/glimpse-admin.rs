use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use glimpse::batch::StatsJob;
use glimpse::config::{Config, DatabaseBackend};
use glimpse::storage::{PostgresStorage, SqliteStorage, Storage};

#[derive(Parser)]
#[command(name = "glimpse-admin")]
#[command(about = "Glimpse admin management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one statistics recomputation pass over pending buckets
    Recompute,
    /// Clear the processed marker for a (date, domain) pair so the next
    /// pass recomputes its buckets
    Reset {
        /// Bucket date (YYYY-MM-DD)
        date: String,
        /// Bucket domain
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Recompute => {
            let job = StatsJob::new(Arc::clone(&storage));
            let report = job.run_once().await?;
            println!(
                "✓ Recomputed {} bucket(s), {} failed",
                report.processed, report.failed
            );
        }
        Commands::Reset { date, domain } => {
            let cleared = storage.clear_processed(&date, &domain).await?;
            if cleared > 0 {
                println!("✓ Cleared processed marker on {} bucket(s)", cleared);
            } else {
                println!("⚠ No buckets found for {} / {}", date, domain);
            }
        }
    }

    Ok(())
}
