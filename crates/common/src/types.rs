use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// Lifecycle state of a note.
///
/// `pending` covers both "never attempted" and "retry scheduled" — the
/// `not_before` marker on the note disambiguates the two. `failed` is a
/// valid terminal state accepted by replay but never produced by the
/// delivery executor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Pending,
    Delivered,
    Failed,
    Dead,
}

impl std::fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoteStatus::Pending => write!(f, "pending"),
            NoteStatus::Delivered => write!(f, "delivered"),
            NoteStatus::Failed => write!(f, "failed"),
            NoteStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Immutable record of one delivery try against a note.
///
/// `status_code` is the observed HTTP status, or `0` when no response was
/// received at all (timeout, connection failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub at: DateTime<Utc>,
    pub status_code: i32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A schedulable note: payload plus delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub release_at: DateTime<Utc>,
    pub webhook_url: String,
    pub status: NoteStatus,
    pub attempts: Json<Vec<Attempt>>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Eligibility gate distinct from `release_at`: the poller's claim lease
    /// and the retry wait both live here. NULL means immediately eligible
    /// once `release_at` has passed.
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queue payload for one delivery job. Carries only the note id — the
/// executor always reloads current state from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub note_id: Uuid,
}

/// JSON body POSTed to the note's webhook URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub title: String,
    pub body: String,
    #[serde(rename = "releaseAt")]
    pub release_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_column_values() {
        assert_eq!(NoteStatus::Pending.to_string(), "pending");
        assert_eq!(NoteStatus::Delivered.to_string(), "delivered");
        assert_eq!(NoteStatus::Failed.to_string(), "failed");
        assert_eq!(NoteStatus::Dead.to_string(), "dead");
    }

    #[test]
    fn test_attempt_error_omitted_when_none() {
        let attempt = Attempt {
            at: Utc::now(),
            status_code: 200,
            ok: true,
            error: None,
        };
        let json = serde_json::to_value(&attempt).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_webhook_payload_uses_camel_case_release_at() {
        let payload = WebhookPayload {
            title: "t".to_string(),
            body: "b".to_string(),
            release_at: Utc::now(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("releaseAt").is_some());
        assert!(json.get("release_at").is_none());
    }
}
