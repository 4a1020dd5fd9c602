//! Redis-backed delivery queue.
//!
//! At-least-once job transport for `DeliveryJob`s, built on three keys:
//!
//! - `<name>:ready` — list of jobs visible to consumers (LPUSH in, LMOVE out)
//! - `<name>:delayed` — sorted set of jobs not yet visible, scored by the
//!   epoch-millisecond instant at which they become due
//! - `<name>:processing` — list of jobs handed to a consumer but not yet
//!   acked; drained back to `ready` on worker startup after a crash
//!
//! A delayed job is guaranteed not to become visible before its deadline,
//! with no upper bound on how much later it is actually consumed.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::AppError;
use crate::types::DeliveryJob;

/// Moves due members of the delayed zset onto the ready list in one atomic
/// step, so a crash between ZREM and LPUSH cannot lose a job.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, member in ipairs(due) do
    redis.call('ZREM', KEYS[1], member)
    redis.call('LPUSH', KEYS[2], member)
end
return #due
"#;

/// Redis-backed at-least-once queue for delivery jobs.
#[derive(Clone)]
pub struct DeliveryQueue {
    redis: ConnectionManager,
    ready_key: String,
    delayed_key: String,
    processing_key: String,
}

impl DeliveryQueue {
    pub fn new(redis: ConnectionManager, name: &str) -> Self {
        Self {
            redis,
            ready_key: format!("{}:ready", name),
            delayed_key: format!("{}:delayed", name),
            processing_key: format!("{}:processing", name),
        }
    }

    /// Admit one job, optionally invisible until `delay` has elapsed.
    pub async fn admit(
        &mut self,
        job: &DeliveryJob,
        delay: Option<Duration>,
    ) -> Result<(), AppError> {
        let payload = Self::encode(job)?;

        match delay {
            Some(delay) => {
                let due_at_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                self.redis
                    .zadd::<_, _, _, ()>(&self.delayed_key, &payload, due_at_ms)
                    .await?;
            }
            None => {
                self.redis.lpush::<_, _, ()>(&self.ready_key, &payload).await?;
            }
        }

        Ok(())
    }

    /// Take the next ready job, if any, moving it to the processing list.
    ///
    /// Promotes due delayed jobs first. Non-blocking — callers poll and
    /// sleep when `None` is returned.
    pub async fn next(&mut self) -> Result<Option<DeliveryJob>, AppError> {
        self.promote_due().await?;

        let payload: Option<String> = self
            .redis
            .lmove(
                &self.ready_key,
                &self.processing_key,
                redis::Direction::Right,
                redis::Direction::Left,
            )
            .await?;

        match payload {
            Some(payload) => Ok(Some(Self::decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Acknowledge a job, removing it from the processing list.
    pub async fn ack(&mut self, job: &DeliveryJob) -> Result<(), AppError> {
        let payload = Self::encode(job)?;
        self.redis
            .lrem::<_, _, ()>(&self.processing_key, 1, &payload)
            .await?;
        Ok(())
    }

    /// Return a job to the ready list for redelivery (e.g. after a storage
    /// failure while executing it).
    pub async fn nack(&mut self, job: &DeliveryJob) -> Result<(), AppError> {
        let payload = Self::encode(job)?;
        self.redis
            .lrem::<_, _, ()>(&self.processing_key, 1, &payload)
            .await?;
        self.redis.lpush::<_, _, ()>(&self.ready_key, &payload).await?;
        Ok(())
    }

    /// Drain jobs left on the processing list by a crashed worker back to
    /// the ready list. Called once at worker startup.
    pub async fn recover(&mut self) -> Result<u64, AppError> {
        let mut recovered = 0u64;
        loop {
            let moved: Option<String> = self
                .redis
                .lmove(
                    &self.processing_key,
                    &self.ready_key,
                    redis::Direction::Right,
                    redis::Direction::Left,
                )
                .await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(recovered, "Requeued jobs abandoned by a previous worker");
        }
        Ok(recovered)
    }

    /// Move delayed jobs whose deadline has passed onto the ready list.
    pub async fn promote_due(&mut self) -> Result<u64, AppError> {
        let now_ms = Utc::now().timestamp_millis();
        let promoted: i64 = redis::Script::new(PROMOTE_SCRIPT)
            .key(&self.delayed_key)
            .key(&self.ready_key)
            .arg(now_ms)
            .invoke_async(&mut self.redis)
            .await?;
        Ok(promoted as u64)
    }

    fn encode(job: &DeliveryJob) -> Result<String, AppError> {
        serde_json::to_string(job)
            .map_err(|e| AppError::Internal(format!("Failed to encode job: {}", e)))
    }

    fn decode(payload: &str) -> Result<DeliveryJob, AppError> {
        serde_json::from_str(payload)
            .map_err(|e| AppError::Internal(format!("Failed to decode job: {}", e)))
    }
}
