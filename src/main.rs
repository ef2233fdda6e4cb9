use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use glimpse::analytics::{AnalyticsContext, Blacklist, IpRangeIndex, Ingestor};
use glimpse::api::{create_router, AppState};
use glimpse::batch::StatsJob;
use glimpse::config::{Config, DatabaseBackend};
use glimpse::storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(SqliteStorage::new(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    // Build the immutable analytics context: bot IP ranges and blacklist
    // rules are loaded once and never mutated afterwards.
    let ranges = match config.ingest.ranges_path.as_deref() {
        Some(path) => match IpRangeIndex::from_file(path) {
            Ok(index) => {
                info!(ranges = index.len(), path, "Loaded bot IP ranges");
                index
            }
            Err(err) => {
                warn!(error = %err, "Failed to load bot IP ranges, IP-based bot flags disabled");
                IpRangeIndex::default()
            }
        },
        None => {
            info!("No bot range file configured, IP-based bot flags disabled");
            IpRangeIndex::default()
        }
    };

    let blacklist = Blacklist::from_config(&config.blacklist);
    if blacklist.is_empty() {
        info!("Blacklist is empty, all requests pass the filter");
    }

    let ctx = Arc::new(AnalyticsContext {
        ranges,
        blacklist,
        category: config.ingest.category.clone(),
    });

    // Start the periodic statistics recomputation task, out-of-band from
    // ingestion.
    let job = StatsJob::new(Arc::clone(&storage));
    let interval_secs = config.stats.interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // Skip the first tick which fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match job.run_once().await {
                Ok(report) if report.processed > 0 || report.failed > 0 => {
                    info!(
                        processed = report.processed,
                        failed = report.failed,
                        "statistics pass complete"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "statistics pass failed"),
            }
        }
    });

    let state = Arc::new(AppState {
        ingestor: Ingestor::new(Arc::clone(&storage), ctx),
        ingest_config: config.ingest.clone(),
    });
    let router = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Beacon server listening on http://{}", addr);
    info!("   - Ingestion endpoint at http://{}/beacon", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
