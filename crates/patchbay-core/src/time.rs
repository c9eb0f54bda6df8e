//! Timing utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp type (milliseconds since the Unix epoch)
pub type Timestamp = u64;

/// Get current Unix timestamp in milliseconds
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Seconds elapsed between two timestamps (negative if `to` is earlier)
pub fn seconds_between(from: Timestamp, to: Timestamp) -> f64 {
    (to as f64 - from as f64) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now();
        let b = now();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }

    #[test]
    fn test_seconds_between() {
        assert_eq!(seconds_between(1000, 3500), 2.5);
        assert_eq!(seconds_between(2000, 1000), -1.0);
    }
}
