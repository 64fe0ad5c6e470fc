//! Exponential backoff with jitter for reconnecting to a degraded store.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based); zero for attempt 0.
///
/// Doubles from `base_ms` per attempt, capped at `max_ms`, plus up to 10% jitter
/// so instances that lost the store together do not reconnect in lockstep.
pub fn reconnect_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(32));
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
