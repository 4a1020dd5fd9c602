//! Notedrop delivery worker binary entrypoint.
//!
//! Runs `WORKER_CONCURRENCY` consumer tasks over the shared Redis queue plus
//! one promoter task that makes delayed retry jobs visible. On ctrl-c the
//! workers stop taking new jobs and in-flight deliveries are drained before
//! exit; an abandoned job is re-queued by `DeliveryQueue::recover` on the
//! next startup.

use std::time::Duration;

use tokio::sync::watch;

use notedrop_common::config::AppConfig;
use notedrop_common::db;
use notedrop_common::queue::DeliveryQueue;
use notedrop_common::redis_pool::create_redis_pool;

use notedrop_delivery::executor::DeliveryExecutor;

/// Queue name shared with the poller.
const QUEUE_NAME: &str = "note-delivery";

/// How long an idle worker sleeps before checking the queue again.
const IDLE_SLEEP: Duration = Duration::from_millis(500);

/// How often delayed jobs are promoted onto the ready list.
const PROMOTE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notedrop_delivery=info,notedrop_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Notedrop delivery worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Connect to Redis
    let redis = create_redis_pool(&config.redis_url).await?;

    // Re-queue anything a crashed worker left mid-flight
    let mut queue = DeliveryQueue::new(redis, QUEUE_NAME);
    queue.recover().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Promoter: moves due delayed retries onto the ready list
    let promoter = tokio::spawn(promote_loop(queue.clone(), shutdown_rx.clone()));

    // Consumer tasks
    let mut workers = Vec::new();
    for worker_id in 0..config.worker_concurrency {
        let executor = DeliveryExecutor::new(
            pool.clone(),
            queue.clone(),
            Duration::from_millis(config.webhook_timeout_ms),
            config.max_attempts,
        )?;
        workers.push(tokio::spawn(worker_loop(
            worker_id,
            queue.clone(),
            executor,
            shutdown_rx.clone(),
        )));
    }

    tracing::info!(
        concurrency = config.worker_concurrency,
        max_attempts = config.max_attempts,
        "Delivery workers started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, draining in-flight jobs...");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        let _ = worker.await;
    }
    let _ = promoter.await;

    tracing::info!("Notedrop delivery worker stopped.");
    Ok(())
}

/// Periodically promote due delayed jobs until shutdown.
async fn promote_loop(mut queue: DeliveryQueue, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(PROMOTE_INTERVAL) => {
                if let Err(e) = queue.promote_due().await {
                    tracing::error!(error = %e, "Failed to promote delayed jobs");
                }
            }
        }
    }
}

/// Single consumer loop: take a job, execute it, ack on any delivery-level
/// outcome, nack on infrastructure failure so the queue redelivers.
async fn worker_loop(
    worker_id: u32,
    mut queue: DeliveryQueue,
    mut executor: DeliveryExecutor,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = match queue.next().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                }
                continue;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Failed to take next job");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match executor.execute(&job).await {
            Ok(()) => {
                if let Err(e) = queue.ack(&job).await {
                    tracing::error!(worker_id, note_id = %job.note_id, error = %e, "Failed to ack job");
                }
            }
            Err(e) => {
                tracing::error!(
                    worker_id,
                    note_id = %job.note_id,
                    error = %e,
                    "Delivery job failed on infrastructure, returning to queue"
                );
                if let Err(e) = queue.nack(&job).await {
                    tracing::error!(worker_id, note_id = %job.note_id, error = %e, "Failed to nack job");
                }
                // Avoid a hot loop while storage is down
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    tracing::debug!(worker_id, "Worker stopped");
}
