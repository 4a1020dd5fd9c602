use notedrop_common::config::AppConfig;
use notedrop_common::db;
use notedrop_common::queue::DeliveryQueue;
use notedrop_common::redis_pool::create_redis_pool;
use notedrop_poller::poller::NotePoller;

/// Queue name shared with the delivery worker.
const QUEUE_NAME: &str = "note-delivery";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notedrop_poller=info,notedrop_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Notedrop poller starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Connect to Redis
    let redis = create_redis_pool(&config.redis_url).await?;
    let queue = DeliveryQueue::new(redis, QUEUE_NAME);

    let mut poller = NotePoller::new(
        pool,
        queue,
        config.poll_interval_ms,
        config.claim_lease_secs,
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = poller.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Note poller exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Notedrop poller stopped.");
    Ok(())
}
