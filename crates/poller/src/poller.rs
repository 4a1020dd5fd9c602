//! Due-note poller.
//!
//! Scans storage on a fixed interval for notes that are due — `pending`,
//! `release_at` in the past, and no eligibility gate in the future — and
//! admits each to the delivery queue exactly once per due cycle.
//!
//! Admission is guarded by a claim: a conditional update that re-checks the
//! exact eligibility the scan observed and pushes `not_before` forward by
//! the claim lease. When two poller instances (or a scan and an in-flight
//! retry schedule) race on the same note, only one claim can succeed; the
//! loser skips without admitting a duplicate job.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use notedrop_common::queue::DeliveryQueue;
use notedrop_common::types::{DeliveryJob, Note};

/// Maximum notes claimed per poll tick.
const POLL_BATCH_SIZE: i64 = 100;

/// Periodic scanner that admits due notes to the delivery queue.
pub struct NotePoller {
    pool: PgPool,
    queue: DeliveryQueue,
    poll_interval: Duration,
    claim_lease: Duration,
}

impl NotePoller {
    pub fn new(
        pool: PgPool,
        queue: DeliveryQueue,
        poll_interval_ms: u64,
        claim_lease_secs: u64,
    ) -> Self {
        Self {
            pool,
            queue,
            poll_interval: Duration::from_millis(poll_interval_ms),
            claim_lease: Duration::from_secs(claim_lease_secs),
        }
    }

    /// Start the polling loop. Runs indefinitely until the task is cancelled.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            claim_lease_secs = self.claim_lease.as_secs(),
            "Note poller started"
        );

        loop {
            match self.poll_once().await {
                Ok(admitted) => {
                    if admitted > 0 {
                        tracing::info!(admitted, "Admitted due notes for delivery");
                    }
                }
                Err(e) => {
                    // Storage or queue hiccup — never crash the loop, the
                    // notes stay due and the next tick retries them.
                    tracing::error!(error = %e, "Poll tick failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll cycle: scan for due notes, claim each, admit the claimed
    /// ones. Returns the number of jobs admitted.
    pub async fn poll_once(&mut self) -> anyhow::Result<u64> {
        let due = self.fetch_due_notes().await?;
        if due.is_empty() {
            return Ok(0);
        }

        tracing::debug!(count = due.len(), "Due notes found");

        let mut admitted = 0u64;
        for note in &due {
            if !self.claim(note.id).await? {
                tracing::debug!(note_id = %note.id, "Claim lost, skipping");
                continue;
            }

            // Job carries only the id; the executor reloads current state.
            self.queue
                .admit(&DeliveryJob { note_id: note.id }, None)
                .await?;
            admitted += 1;
        }

        Ok(admitted)
    }

    /// Fetch notes eligible for delivery right now, oldest release first.
    pub async fn fetch_due_notes(&self) -> anyhow::Result<Vec<Note>> {
        let notes: Vec<Note> = sqlx::query_as(
            r#"
            SELECT * FROM notes
            WHERE status = 'pending'
              AND release_at <= NOW()
              AND (not_before IS NULL OR not_before <= NOW())
            ORDER BY release_at ASC
            LIMIT $1
            "#,
        )
        .bind(POLL_BATCH_SIZE)
        .fetch_all(&self.pool)
        .await?;

        Ok(notes)
    }

    /// Atomically claim a due note by pushing `not_before` forward by the
    /// claim lease. The WHERE clause re-checks the full eligibility
    /// predicate, so the update succeeds for at most one claimer per due
    /// cycle. Returns whether the claim was won.
    pub async fn claim(&self, note_id: Uuid) -> anyhow::Result<bool> {
        let lease_until =
            Utc::now() + chrono::Duration::milliseconds(self.claim_lease.as_millis() as i64);

        let updated = sqlx::query(
            r#"
            UPDATE notes
            SET not_before = $2, updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
              AND release_at <= NOW()
              AND (not_before IS NULL OR not_before <= NOW())
            "#,
        )
        .bind(note_id)
        .bind(lease_until)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }
}
