//! Note service — create, list and replay operations shared by the API.
//!
//! All writes go through conditional updates so a concurrent poller or
//! worker observing the same note can never be raced into a lost update.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use notedrop_common::error::AppError;
use notedrop_common::types::{Note, NoteStatus};

/// Notes returned per page by `list`.
pub const NOTES_PER_PAGE: i64 = 20;

/// Service layer for note CRUD and replay.
pub struct NoteService;

/// Parameters for creating a new note.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateNoteParams {
    pub title: String,
    pub body: String,
    pub release_at: DateTime<Utc>,
    pub webhook_url: String,
}

/// One page of notes plus pagination metadata.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NotesPage {
    pub data: Vec<Note>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Pagination {
    pub total: i64,
    pub page: u32,
    pub per_page: i64,
    pub total_pages: i64,
}

impl NoteService {
    /// Validate creation parameters: non-empty payload fields and an
    /// absolute http(s) webhook URL.
    pub fn validate(params: &CreateNoteParams) -> Result<(), AppError> {
        if params.title.trim().is_empty() {
            return Err(AppError::Validation("title must not be empty".to_string()));
        }
        if params.body.trim().is_empty() {
            return Err(AppError::Validation("body must not be empty".to_string()));
        }

        let url = reqwest::Url::parse(&params.webhook_url).map_err(|_| {
            AppError::Validation(format!(
                "webhook_url '{}' is not an absolute URL",
                params.webhook_url
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AppError::Validation(format!(
                "webhook_url scheme '{}' is not supported (http/https only)",
                url.scheme()
            )));
        }
        if !url.has_host() {
            return Err(AppError::Validation(
                "webhook_url must include a host".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a new note in `pending` with no attempts.
    pub async fn create(pool: &PgPool, params: &CreateNoteParams) -> Result<Note, AppError> {
        Self::validate(params)?;

        let note: Note = sqlx::query_as(
            r#"
            INSERT INTO notes (title, body, release_at, webhook_url, status, attempts)
            VALUES ($1, $2, $3, $4, 'pending', '[]'::jsonb)
            RETURNING *
            "#,
        )
        .bind(&params.title)
        .bind(&params.body)
        .bind(params.release_at)
        .bind(&params.webhook_url)
        .fetch_one(pool)
        .await?;

        tracing::info!(
            note_id = %note.id,
            release_at = %note.release_at,
            "Note created"
        );

        Ok(note)
    }

    /// Get a single note by ID.
    pub async fn get(pool: &PgPool, note_id: Uuid) -> Result<Note, AppError> {
        let note: Note = sqlx::query_as("SELECT * FROM notes WHERE id = $1")
            .bind(note_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Note {} not found", note_id)))?;

        Ok(note)
    }

    /// List notes sorted by `release_at` ascending, optionally filtered by
    /// status, paginated at `NOTES_PER_PAGE` per page (pages are 1-indexed).
    pub async fn list(
        pool: &PgPool,
        page: u32,
        status: Option<NoteStatus>,
    ) -> Result<NotesPage, AppError> {
        let page = page.max(1);
        let offset = (page as i64 - 1) * NOTES_PER_PAGE;

        let (data, total): (Vec<Note>, i64) = match status {
            Some(status) => {
                let data = sqlx::query_as(
                    r#"
                    SELECT * FROM notes
                    WHERE status = $1
                    ORDER BY release_at ASC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(status.to_string())
                .bind(offset)
                .bind(NOTES_PER_PAGE)
                .fetch_all(pool)
                .await?;

                let (total,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM notes WHERE status = $1")
                        .bind(status.to_string())
                        .fetch_one(pool)
                        .await?;
                (data, total)
            }
            None => {
                let data = sqlx::query_as(
                    "SELECT * FROM notes ORDER BY release_at ASC OFFSET $1 LIMIT $2",
                )
                .bind(offset)
                .bind(NOTES_PER_PAGE)
                .fetch_all(pool)
                .await?;

                let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
                    .fetch_one(pool)
                    .await?;
                (data, total)
            }
        };

        Ok(NotesPage {
            data,
            pagination: Pagination {
                total,
                page,
                per_page: NOTES_PER_PAGE,
                total_pages: (total + NOTES_PER_PAGE - 1) / NOTES_PER_PAGE,
            },
        })
    }

    /// Replay a terminally failed note: reset it to `pending` with no
    /// attempts so the poller picks it up again. Only `dead` or `failed`
    /// notes can be replayed; `release_at` is left untouched.
    pub async fn replay(pool: &PgPool, note_id: Uuid) -> Result<Note, AppError> {
        let note: Option<Note> = sqlx::query_as(
            r#"
            UPDATE notes
            SET status = 'pending',
                attempts = '[]'::jsonb,
                delivered_at = NULL,
                not_before = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('dead', 'failed')
            RETURNING *
            "#,
        )
        .bind(note_id)
        .fetch_optional(pool)
        .await?;

        match note {
            Some(note) => {
                tracing::info!(note_id = %note.id, "Note replayed");
                Ok(note)
            }
            None => {
                // Distinguish "no such note" from "wrong status".
                let existing = Self::get(pool, note_id).await?;
                Err(AppError::Validation(format!(
                    "Only dead or failed notes can be replayed (note {} is {})",
                    note_id, existing.status
                )))
            }
        }
    }
}
