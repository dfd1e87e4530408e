//! Utility functions for the pairing service

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::types::GameId;

/// Generate a new unique game ID
pub fn generate_game_id() -> GameId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Delay before the given reconnection attempt: `base * 2^(attempt - 1)`.
/// Attempt numbering starts at 1; attempt 0 is treated as 1.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Trim a caller-provided identifier, rejecting empty values
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let game_id1 = generate_game_id();
        let game_id2 = generate_game_id();
        assert_ne!(game_id1, game_id2);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(base, 5), Duration::from_millis(16000));
        assert_eq!(backoff_delay(base, 0), base);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some(" alice ")), Some("alice"));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }
}
