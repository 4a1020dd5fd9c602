//! Note routes: create, paginated list, operator replay.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use notedrop_common::error::AppError;
use notedrop_common::types::NoteStatus;
use notedrop_delivery::notes::{CreateNoteParams, NoteService, NotesPage};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notes", post(create_note))
        .route("/api/notes", get(list_notes))
        .route("/api/notes/{id}/replay", post(replay_note))
}

/// Query parameters for the paginated note list.
#[derive(Debug, Deserialize)]
struct ListNotesQuery {
    page: Option<u32>,
    /// One of the note statuses, or "all" (default) for no filter.
    status: Option<String>,
}

/// POST /api/notes — Create a new scheduled note.
async fn create_note(
    State(state): State<AppState>,
    Json(params): Json<CreateNoteParams>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let note = NoteService::create(&state.pool, &params).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Note created successfully",
            "id": note.id,
        })),
    ))
}

/// GET /api/notes?page=&status= — List notes sorted by release time.
async fn list_notes(
    State(state): State<AppState>,
    Query(query): Query<ListNotesQuery>,
) -> Result<Json<NotesPage>, AppError> {
    let status = parse_status_filter(query.status.as_deref())?;
    let page = NoteService::list(&state.pool, query.page.unwrap_or(1), status).await?;
    Ok(Json(page))
}

/// POST /api/notes/:id/replay — Reset a dead or failed note to pending.
async fn replay_note(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let note = NoteService::replay(&state.pool, id).await?;
    Ok(Json(serde_json::json!({
        "message": "Note requeued successfully",
        "id": note.id,
    })))
}

/// Map the `status` query value onto an optional filter.
fn parse_status_filter(status: Option<&str>) -> Result<Option<NoteStatus>, AppError> {
    match status {
        None | Some("all") => Ok(None),
        Some("pending") => Ok(Some(NoteStatus::Pending)),
        Some("delivered") => Ok(Some(NoteStatus::Delivered)),
        Some("failed") => Ok(Some(NoteStatus::Failed)),
        Some("dead") => Ok(Some(NoteStatus::Dead)),
        Some(other) => Err(AppError::Validation(format!(
            "Invalid status filter '{}'. Valid values: all, pending, delivered, failed, dead",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_filter() {
        assert_eq!(parse_status_filter(None).unwrap(), None);
        assert_eq!(parse_status_filter(Some("all")).unwrap(), None);
        assert_eq!(
            parse_status_filter(Some("dead")).unwrap(),
            Some(NoteStatus::Dead)
        );
        assert!(parse_status_filter(Some("bogus")).is_err());
    }
}
