use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rssking::config::Config;
use rssking::db::Database;
use rssking::pipeline::{start_scheduled_runs, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rssking=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load("rssking.toml")?;
    info!("Loaded {} feeds from configuration", config.feeds.len());

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:rssking.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_feeds(&config.feeds).await?;
    info!("Database initialized");

    let db = Arc::new(db);
    let refresh_interval = config.refresh_interval;
    let pipeline = Arc::new(Pipeline::new(db, config)?);

    // Batch mode for cron-style schedulers: one run, then exit
    if std::env::var("RSSKING_ONCE").is_ok() {
        let summary = pipeline.run().await?;
        info!(
            "Single run finished: {} items persisted ({} feeds failed)",
            summary.persisted, summary.feeds_failed
        );
        return Ok(());
    }

    start_scheduled_runs(pipeline, refresh_interval).await;

    Ok(())
}
