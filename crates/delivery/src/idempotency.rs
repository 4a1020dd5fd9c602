//! Delivery deduplication token.
//!
//! The token is derived from the note's identity and release time only —
//! never from the attempt count or the clock — so every retry of the same
//! note presents an identical `X-Idempotency-Key` and the receiver can
//! collapse repeated deliveries of one logical event.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Deterministic deduplication token for a `(note_id, release_at)` pair:
/// lowercase hex SHA-256 of the UUID string concatenated with the RFC 3339
/// timestamp.
pub fn idempotency_key(note_id: Uuid, release_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(note_id.to_string().as_bytes());
    hasher.update(
        release_at
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_deterministic() {
        let id = Uuid::new_v4();
        let at = Utc::now();
        assert_eq!(idempotency_key(id, at), idempotency_key(id, at));
    }

    #[test]
    fn test_is_lowercase_hex_sha256() {
        let key = idempotency_key(Uuid::new_v4(), Utc::now());
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_distinct_ids_yield_distinct_keys() {
        let at = Utc::now();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(idempotency_key(Uuid::new_v4(), at)));
        }
    }

    #[test]
    fn test_distinct_release_times_yield_distinct_keys() {
        let id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut seen = HashSet::new();
        for secs in 0..10_000 {
            let at = base + chrono::Duration::seconds(secs);
            assert!(seen.insert(idempotency_key(id, at)));
        }
    }

    #[test]
    fn test_subsecond_precision_is_stable() {
        // Keys must not depend on precision beyond what is hashed: the same
        // instant always produces the same key regardless of how it was built.
        let at = Utc.timestamp_millis_opt(1_735_689_600_123).unwrap();
        let id = Uuid::new_v4();
        let again = Utc.timestamp_millis_opt(1_735_689_600_123).unwrap();
        assert_eq!(idempotency_key(id, at), idempotency_key(id, again));
    }
}
