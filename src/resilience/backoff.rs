//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is 1-based; attempt 1 waits `base_ms`, each following attempt
/// multiplies the previous wait by `multiplier`, capped at `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, multiplier: f64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let factor = multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
    let capped_delay = ((base_ms as f64 * factor) as u64).min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay.saturating_add(jitter))
}
