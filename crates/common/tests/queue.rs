//! Integration tests for the Redis-backed delivery queue.
//!
//! Requires Redis. Run with:
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p notedrop-common --test queue -- --ignored --nocapture
//! ```

use std::time::Duration;

use uuid::Uuid;

use notedrop_common::queue::DeliveryQueue;
use notedrop_common::redis_pool::create_redis_pool;
use notedrop_common::types::DeliveryJob;

async fn test_queue() -> DeliveryQueue {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let redis = create_redis_pool(&redis_url).await.unwrap();
    DeliveryQueue::new(redis, &format!("test:queue:{}", Uuid::new_v4()))
}

fn job() -> DeliveryJob {
    DeliveryJob {
        note_id: Uuid::new_v4(),
    }
}

#[tokio::test]
#[ignore]
async fn test_admit_next_ack_roundtrip() {
    let mut queue = test_queue().await;
    let job = job();

    queue.admit(&job, None).await.unwrap();
    assert_eq!(queue.next().await.unwrap(), Some(job.clone()));
    // Consumed, not redelivered
    assert_eq!(queue.next().await.unwrap(), None);

    queue.ack(&job).await.unwrap();
    // Acked jobs are not recovered
    assert_eq!(queue.recover().await.unwrap(), 0);
    assert_eq!(queue.next().await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_jobs_are_consumed_in_admission_order() {
    let mut queue = test_queue().await;
    let first = job();
    let second = job();

    queue.admit(&first, None).await.unwrap();
    queue.admit(&second, None).await.unwrap();

    assert_eq!(queue.next().await.unwrap(), Some(first));
    assert_eq!(queue.next().await.unwrap(), Some(second));
}

#[tokio::test]
#[ignore]
async fn test_delayed_job_is_invisible_until_deadline() {
    let mut queue = test_queue().await;
    let job = job();

    queue
        .admit(&job, Some(Duration::from_millis(500)))
        .await
        .unwrap();

    // Not yet visible, even though next() promotes due jobs
    assert_eq!(queue.next().await.unwrap(), None);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(queue.next().await.unwrap(), Some(job));
}

#[tokio::test]
#[ignore]
async fn test_nack_returns_job_for_redelivery() {
    let mut queue = test_queue().await;
    let job = job();

    queue.admit(&job, None).await.unwrap();
    assert_eq!(queue.next().await.unwrap(), Some(job.clone()));

    queue.nack(&job).await.unwrap();
    assert_eq!(queue.next().await.unwrap(), Some(job));
}

#[tokio::test]
#[ignore]
async fn test_recover_requeues_unacked_jobs() {
    let mut queue = test_queue().await;
    let job = job();

    queue.admit(&job, None).await.unwrap();
    assert_eq!(queue.next().await.unwrap(), Some(job.clone()));

    // Simulate a worker crash: never acked. A fresh worker recovers it.
    assert_eq!(queue.recover().await.unwrap(), 1);
    assert_eq!(queue.next().await.unwrap(), Some(job));
}
