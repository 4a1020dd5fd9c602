//! Retry backoff policy.
//!
//! Pure table lookup mapping a 1-indexed attempt number (the count of failed
//! attempts so far) to the delay before the next try. Attempt numbers beyond
//! the table reuse the last entry, so the sequence is non-decreasing.

use std::time::Duration;

/// Delay table indexed by `min(attempt_number - 1, len - 1)`.
const BACKOFF_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(25),
];

/// Delay to wait after the `attempt_number`-th failed attempt.
///
/// `attempt_number` is 1-indexed; `0` is treated as `1` so a miscounted
/// caller still gets the shortest delay rather than a panic.
pub fn delay(attempt_number: u32) -> Duration {
    let index = attempt_number.saturating_sub(1) as usize;
    BACKOFF_DELAYS[index.min(BACKOFF_DELAYS.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_values() {
        assert_eq!(delay(1), Duration::from_secs(1));
        assert_eq!(delay(2), Duration::from_secs(5));
        assert_eq!(delay(3), Duration::from_secs(25));
    }

    #[test]
    fn test_beyond_table_reuses_last_delay() {
        assert_eq!(delay(4), Duration::from_secs(25));
        assert_eq!(delay(100), Duration::from_secs(25));
    }

    #[test]
    fn test_zero_clamps_to_first_entry() {
        assert_eq!(delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_non_decreasing() {
        let mut prev = Duration::ZERO;
        for n in 1..=10 {
            let d = delay(n);
            assert!(d >= prev, "delay({}) = {:?} decreased below {:?}", n, d, prev);
            prev = d;
        }
    }
}
