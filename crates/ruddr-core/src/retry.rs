//! Exponential backoff shared by the scheduler and the publish engine

use std::time::Duration;

/// Delay before retry number `retries` (zero-based)
///
/// `min * 2^retries`, capped at `max`. Saturates instead of overflowing for
/// large retry counts.
pub fn backoff_delay(min: Duration, retries: u32, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(retries).unwrap_or(u32::MAX);
    min.checked_mul(factor).unwrap_or(max).min(max)
}
