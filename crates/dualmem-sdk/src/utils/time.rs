//! Time Utilities

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Fractional days between `then` and `now`. Future timestamps count as 0.
pub fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - then).num_milliseconds() as f64 / 1000.0;
    (seconds / 86_400.0).max(0.0)
}

/// Milliseconds since `start`, as a float for averaging.
pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
