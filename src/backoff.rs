//! Exponential backoff computation with optional jitter.
//!
//! Pure delay arithmetic shared by the retry executor; kept free of clocks
//! and sleeping so it can be exercised exhaustively in tests.

use rand::Rng;
use std::time::Duration;

/// Fraction of the computed delay used for jitter spread (±25%).
const JITTER_RATIO: f64 = 0.25;

/// Compute the delay before the next retry attempt.
///
/// `attempt` is 1-indexed (the delay after the first failure is
/// `base * 2^0 = base`); values of 0 are treated as 1. The unjittered delay
/// doubles per attempt and is capped at `max`. With `jitter`, the capped
/// delay is perturbed by a uniform ±25% so synchronized callers do not
/// retry in lockstep; jitter may exceed the cap by up to 25% but can never
/// produce a negative delay.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use floodgate::backoff::backoff_delay;
///
/// let base = Duration::from_secs(1);
/// let max = Duration::from_secs(60);
/// assert_eq!(backoff_delay(1, base, max, false), Duration::from_secs(1));
/// assert_eq!(backoff_delay(3, base, max, false), Duration::from_secs(4));
/// assert_eq!(backoff_delay(10, base, max, false), Duration::from_secs(60));
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    let attempt = attempt.max(1);
    // Saturating arithmetic: absurd attempt numbers pin at the cap instead
    // of overflowing.
    let multiplier = 2u32.saturating_pow(attempt - 1);
    let mut delay = base.saturating_mul(multiplier).min(max);

    if jitter && !delay.is_zero() {
        let spread: f64 = rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
        delay = delay.mul_f64((1.0 + spread).max(0.0));
    }

    delay
}
