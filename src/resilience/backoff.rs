//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Hard ceiling for a single delay, whatever the configuration says.
pub const BACKOFF_CEILING_SECS: f64 = 3600.0;

/// Delay before retry number `attempt` (0-based): `factor_secs * 2^attempt`,
/// capped at `max_secs`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, factor_secs: f64, max_secs: f64) -> Duration {
    if !(factor_secs.is_finite() && factor_secs > 0.0) {
        return Duration::ZERO;
    }

    let exponential = factor_secs * 2f64.powi(attempt.min(32) as i32);
    let capped = exponential
        .min(max_secs.max(0.0))
        .min(BACKOFF_CEILING_SECS);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped / 10.0;
    let jitter = if jitter_range > 0.0 {
        rand::thread_rng().gen_range(0.0..jitter_range)
    } else {
        0.0
    };

    Duration::try_from_secs_f64(capped + jitter).unwrap_or(Duration::ZERO)
}
