//! Delivery executor — runs one delivery attempt and advances the note's
//! state machine.
//!
//! For each admitted job:
//! 1. Reload the note (the job carries only the id)
//! 2. POST the payload to its webhook URL with the deduplication headers
//! 3. Record the attempt and flip status in a single conditional update
//! 4. Re-admit a delayed job when a retry is still within budget
//!
//! Every storage write is guarded by the expected prior state (`pending`
//! plus the observed attempt count), so a duplicate job redelivered by the
//! queue can never double-advance the state machine — it loses the guard
//! and becomes a no-op.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::types::Json;

use notedrop_common::error::AppError;
use notedrop_common::queue::DeliveryQueue;
use notedrop_common::types::{Attempt, DeliveryJob, Note, NoteStatus, WebhookPayload};

use crate::backoff;
use crate::idempotency::idempotency_key;

/// Status code recorded when no HTTP response was received (timeout,
/// connection failure).
pub const NO_RESPONSE_STATUS: i32 = 0;

/// Outcome of one webhook call. Success is exactly HTTP 200.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub status_code: i32,
    pub ok: bool,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn from_status(status: u16) -> Self {
        Self {
            status_code: status as i32,
            ok: status == 200,
            error: if status == 200 {
                None
            } else {
                Some(format!("Unexpected status: {}", status))
            },
        }
    }

    pub fn from_request_error(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out".to_string()
        } else {
            format!("Request failed: {}", err)
        };
        Self {
            status_code: NO_RESPONSE_STATUS,
            ok: false,
            error: Some(message),
        }
    }
}

/// Outbound webhook caller. Split from the executor so the wire contract
/// (payload shape, headers, timeout, strict-200 success) is testable
/// without storage.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
}

impl WebhookClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// POST `{title, body, releaseAt}` to the note's webhook URL with the
    /// `X-Note-Id` and `X-Idempotency-Key` headers. Never returns an error:
    /// any failure mode is folded into the outcome.
    pub async fn deliver(&self, note: &Note, idempotency_key: &str) -> DeliveryOutcome {
        let payload = WebhookPayload {
            title: note.title.clone(),
            body: note.body.clone(),
            release_at: note.release_at,
        };

        let result = self
            .http
            .post(&note.webhook_url)
            .header("X-Note-Id", note.id.to_string())
            .header("X-Idempotency-Key", idempotency_key)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(resp) => DeliveryOutcome::from_status(resp.status().as_u16()),
            Err(err) => DeliveryOutcome::from_request_error(&err),
        }
    }
}

/// Consumes delivery jobs and drives note state transitions.
pub struct DeliveryExecutor {
    pool: PgPool,
    queue: DeliveryQueue,
    webhook: WebhookClient,
    max_attempts: u32,
}

impl DeliveryExecutor {
    pub fn new(
        pool: PgPool,
        queue: DeliveryQueue,
        webhook_timeout: Duration,
        max_attempts: u32,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            pool,
            queue,
            webhook: WebhookClient::new(webhook_timeout)?,
            max_attempts,
        })
    }

    /// Execute one delivery attempt for the given job.
    ///
    /// Returns `Ok(())` for every delivery-level outcome (success, retry
    /// scheduled, dead-lettered, stale duplicate, note deleted out of band).
    /// Errors are infrastructure failures only — the caller must not ack the
    /// job so the queue redelivers it.
    pub async fn execute(&mut self, job: &DeliveryJob) -> Result<(), AppError> {
        let note: Option<Note> = sqlx::query_as("SELECT * FROM notes WHERE id = $1")
            .bind(job.note_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(note) = note else {
            // Deleted out of band — terminal no-op, no attempt recorded.
            tracing::warn!(note_id = %job.note_id, "Note not found, dropping job");
            return Ok(());
        };

        if note.status != NoteStatus::Pending {
            // Duplicate redelivery after a terminal transition.
            tracing::debug!(
                note_id = %note.id,
                status = %note.status,
                "Note no longer pending, dropping job"
            );
            return Ok(());
        }

        let key = idempotency_key(note.id, note.release_at);
        let outcome = self.webhook.deliver(&note, &key).await;

        if outcome.ok {
            self.record_success(&note).await
        } else {
            self.record_failure(&note, outcome).await
        }
    }

    /// Mark the note delivered, appending the successful attempt. Single
    /// conditional update keyed on the state observed at load time.
    async fn record_success(&self, note: &Note) -> Result<(), AppError> {
        let now = Utc::now();
        let attempt = Attempt {
            at: now,
            status_code: 200,
            ok: true,
            error: None,
        };

        let updated = sqlx::query(
            r#"
            UPDATE notes
            SET status = 'delivered',
                delivered_at = $2,
                not_before = NULL,
                attempts = attempts || $3,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
              AND jsonb_array_length(attempts) = $4
            "#,
        )
        .bind(note.id)
        .bind(now)
        .bind(Json(&attempt))
        .bind(note.attempts.0.len() as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            tracing::info!(note_id = %note.id, "Note delivered");
        } else {
            tracing::debug!(note_id = %note.id, "Lost delivery transition race, skipping");
        }

        Ok(())
    }

    /// Record a failed attempt and either schedule a retry or dead-letter
    /// the note. The storage write happens before the requeue admission: if
    /// the requeue fails the note still carries its `not_before`, and the
    /// unacked job's queue redelivery keeps it from being lost.
    async fn record_failure(
        &mut self,
        note: &Note,
        outcome: DeliveryOutcome,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let attempt = Attempt {
            at: now,
            status_code: outcome.status_code,
            ok: false,
            error: outcome.error,
        };
        let prev_attempts = note.attempts.0.len() as u32;
        let attempt_number = prev_attempts + 1;

        if attempt_number < self.max_attempts {
            let delay = backoff::delay(attempt_number);
            let eligible_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);

            let updated = sqlx::query(
                r#"
                UPDATE notes
                SET attempts = attempts || $2,
                    not_before = $3,
                    updated_at = NOW()
                WHERE id = $1
                  AND status = 'pending'
                  AND jsonb_array_length(attempts) = $4
                "#,
            )
            .bind(note.id)
            .bind(Json(&attempt))
            .bind(eligible_at)
            .bind(prev_attempts as i32)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 1 {
                tracing::info!(
                    note_id = %note.id,
                    attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    "Delivery failed, retry scheduled"
                );
                self.queue
                    .admit(&DeliveryJob { note_id: note.id }, Some(delay))
                    .await?;
            } else {
                tracing::debug!(note_id = %note.id, "Lost retry transition race, skipping");
            }
        } else {
            let updated = sqlx::query(
                r#"
                UPDATE notes
                SET status = 'dead',
                    not_before = NULL,
                    attempts = attempts || $2,
                    updated_at = NOW()
                WHERE id = $1
                  AND status = 'pending'
                  AND jsonb_array_length(attempts) = $3
                "#,
            )
            .bind(note.id)
            .bind(Json(&attempt))
            .bind(prev_attempts as i32)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 1 {
                tracing::warn!(
                    note_id = %note.id,
                    attempt_number,
                    "Attempt budget exhausted, note dead-lettered"
                );
            } else {
                tracing::debug!(note_id = %note.id, "Lost dead-letter transition race, skipping");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn make_note(webhook_url: &str) -> Note {
        Note {
            id: Uuid::new_v4(),
            title: "Launch".to_string(),
            body: "We are live".to_string(),
            release_at: Utc::now(),
            webhook_url: webhook_url.to_string(),
            status: NoteStatus::Pending,
            attempts: Json(vec![]),
            delivered_at: None,
            not_before: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_outcome_strict_200() {
        assert!(DeliveryOutcome::from_status(200).ok);
        for status in [201, 204, 301, 400, 404, 500, 503] {
            let outcome = DeliveryOutcome::from_status(status);
            assert!(!outcome.ok, "status {} must not count as success", status);
            assert_eq!(outcome.status_code, status as i32);
            assert!(outcome.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_deliver_sends_payload_and_dedup_headers() {
        let server = MockServer::start().await;
        let note = make_note(&format!("{}/hook", server.uri()));
        let key = idempotency_key(note.id, note.release_at);

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("X-Note-Id", note.id.to_string().as_str()))
            .and(header("X-Idempotency-Key", key.as_str()))
            .and(body_partial_json(json!({
                "title": "Launch",
                "body": "We are live"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = WebhookClient::new(Duration::from_secs(5)).unwrap();
        let outcome = client.deliver(&note, &key).await;
        assert!(outcome.ok);
        assert_eq!(outcome.status_code, 200);
    }

    #[tokio::test]
    async fn test_deliver_non_200_is_failure_with_observed_status() {
        let server = MockServer::start().await;
        let note = make_note(&format!("{}/hook", server.uri()));
        let key = idempotency_key(note.id, note.release_at);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = WebhookClient::new(Duration::from_secs(5)).unwrap();
        let outcome = client.deliver(&note, &key).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, 500);
    }

    #[tokio::test]
    async fn test_deliver_connection_failure_uses_sentinel_status() {
        // Nothing listening on this port.
        let note = make_note("http://127.0.0.1:1/hook");
        let key = idempotency_key(note.id, note.release_at);

        let client = WebhookClient::new(Duration::from_secs(1)).unwrap();
        let outcome = client.deliver(&note, &key).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, NO_RESPONSE_STATUS);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_deliver_timeout_uses_sentinel_status() {
        let server = MockServer::start().await;
        let note = make_note(&format!("{}/hook", server.uri()));
        let key = idempotency_key(note.id, note.release_at);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = WebhookClient::new(Duration::from_millis(200)).unwrap();
        let outcome = client.deliver(&note, &key).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.status_code, NO_RESPONSE_STATUS);
    }

    #[tokio::test]
    async fn test_retries_reuse_the_same_idempotency_key() {
        let server = MockServer::start().await;
        let note = make_note(&format!("{}/hook", server.uri()));
        let key = idempotency_key(note.id, note.release_at);

        Mock::given(method("POST"))
            .and(header("X-Idempotency-Key", key.as_str()))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = WebhookClient::new(Duration::from_secs(5)).unwrap();
        for _ in 0..3 {
            let attempt_key = idempotency_key(note.id, note.release_at);
            assert_eq!(attempt_key, key);
            client.deliver(&note, &attempt_key).await;
        }
    }
}
