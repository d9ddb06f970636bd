//! Bounded exponential backoff.
//!
//! Used by the bus subscription supervisor between reconnect attempts.
//! The math is pure and deterministic given a random sample, so tests can
//! pin the jitter; [`BackoffPolicy::delay`] draws the sample from `rand`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 250;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Reconnect backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (before jitter).
    pub max_delay_ms: u64,
    /// Symmetric jitter range; 0.2 means ±20%.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based), with random jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
        ))
    }
}

/// Exponential backoff with random symmetric jitter.
///
/// `min(max_delay, base_delay * 2^attempt) * (1 ± jitter)`.
#[must_use]
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> u64 {
    calculate_backoff_delay_with_random(
        attempt,
        base_delay_ms,
        max_delay_ms,
        jitter_factor,
        rand::random::<f64>(),
    )
}

/// Same as [`calculate_backoff_delay`] with the random sample supplied.
///
/// `random` should lie in `[0.0, 1.0)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    // maps random [0,1) onto [-jitter, +jitter]
    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    ((capped as f64) * jitter).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = BackoffPolicy::default();
        assert_eq!(p.base_delay_ms, 250);
        assert_eq!(p.max_delay_ms, 30_000);
        assert!((p.jitter_factor - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let d: Vec<u64> = (0..4)
            .map(|a| calculate_backoff_delay_with_random(a, 250, 30_000, 0.0, 0.7))
            .collect();
        assert_eq!(d, vec![250, 500, 1000, 2000]);
    }

    #[test]
    fn caps_at_max() {
        assert_eq!(calculate_backoff_delay_with_random(20, 250, 30_000, 0.0, 0.5), 30_000);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        assert_eq!(
            calculate_backoff_delay_with_random(u32::MAX, u64::MAX, 30_000, 0.0, 0.5),
            30_000
        );
    }

    #[test]
    fn jitter_bounds() {
        let low = calculate_backoff_delay_with_random(2, 1000, 60_000, 0.2, 0.0);
        let mid = calculate_backoff_delay_with_random(2, 1000, 60_000, 0.2, 0.5);
        let high = calculate_backoff_delay_with_random(2, 1000, 60_000, 0.2, 0.999_999);
        assert_eq!(low, 3200);
        assert_eq!(mid, 4000);
        assert!(high <= 4800 && high > 4790);
    }

    #[test]
    fn random_delay_within_range() {
        let p = BackoffPolicy::default();
        for attempt in 0..10 {
            let d = p.delay(attempt).as_millis();
            let nominal = u128::from((250u64 << attempt).min(30_000));
            assert!(d >= nominal * 8 / 10 && d <= nominal * 12 / 10 + 1, "attempt {attempt}: {d}");
        }
    }

    #[test]
    fn serde_defaults_fill_missing() {
        let p: BackoffPolicy = serde_json::from_str(r#"{"baseDelayMs": 100}"#).unwrap();
        assert_eq!(p.base_delay_ms, 100);
        assert_eq!(p.max_delay_ms, 30_000);
    }
}
