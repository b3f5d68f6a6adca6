//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert seconds to duration
pub fn secs_to_duration(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Time elapsed from `since` to `now`, clamped to zero when the clock went backwards
pub fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(since)
        .to_std()
        .unwrap_or_default()
}

/// Strictly greater than: an age equal to the threshold is not yet exceeded
pub fn exceeds(since: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    elapsed(since, now) > threshold
}
