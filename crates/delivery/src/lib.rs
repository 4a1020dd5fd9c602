pub mod backoff;
pub mod executor;
pub mod idempotency;
pub mod notes;
