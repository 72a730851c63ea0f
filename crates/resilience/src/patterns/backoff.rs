//! Delay computation between retry attempts
//!
//! Every function is pure apart from the jitter draw, which comes either
//! from `fastrand`'s thread-local generator or from a caller-provided
//! [`fastrand::Rng`] for reproducible sequences.
//!
//! ```
//! use std::time::Duration;
//! use agentry_resilience::patterns::backoff::{self, BackoffStrategy};
//!
//! let base = Duration::from_millis(100);
//! let max = Duration::from_secs(1);
//!
//! assert_eq!(backoff::exponential(3, base, max, false), Duration::from_millis(800));
//! assert_eq!(backoff::exponential(4, base, max, false), max);
//! assert_eq!(BackoffStrategy::Linear.raw_delay(2, base, max), Duration::from_millis(300));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of the delay curve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^attempt`
    #[default]
    Exponential,
    /// `base * (attempt + 1)`
    Linear,
    /// `base`
    Constant,
}

impl BackoffStrategy {
    /// Capped delay for a zero-based `attempt`, without jitter
    ///
    /// Saturates to `max` instead of overflowing.
    #[must_use]
    pub fn raw_delay(self, attempt: u32, base: Duration, max: Duration) -> Duration {
        let delay = match self {
            Self::Exponential => 2u32
                .checked_pow(attempt)
                .and_then(|factor| base.checked_mul(factor)),
            Self::Linear => attempt
                .checked_add(1)
                .and_then(|factor| base.checked_mul(factor)),
            Self::Constant => Some(base),
        };
        delay.unwrap_or(max).min(max)
    }

    /// Delay for a zero-based `attempt`, drawing jitter from the
    /// thread-local generator
    #[must_use]
    pub fn delay(self, attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
        let capped = self.raw_delay(attempt, base, max);
        if jitter {
            scale(capped, max, fastrand::f64())
        } else {
            capped
        }
    }

    /// Delay for a zero-based `attempt`, drawing jitter from `rng`
    #[must_use]
    pub fn delay_with_rng(
        self,
        attempt: u32,
        base: Duration,
        max: Duration,
        jitter: bool,
        rng: &mut fastrand::Rng,
    ) -> Duration {
        let capped = self.raw_delay(attempt, base, max);
        if jitter {
            scale(capped, max, rng.f64())
        } else {
            capped
        }
    }

    /// Stable name used in logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exponential => "exponential",
            Self::Linear => "linear",
            Self::Constant => "constant",
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scale `delay` by a factor in `[0.5, 1.5)` and cap at `max` again.
/// `unit` is a uniform draw from `[0, 1)`.
fn scale(delay: Duration, max: Duration, unit: f64) -> Duration {
    let factor = 0.5 + unit;
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
        .unwrap_or(max)
        .min(max)
}

/// `min(max, base * 2^attempt)`, optionally jittered
#[must_use]
pub fn exponential(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    BackoffStrategy::Exponential.delay(attempt, base, max, jitter)
}

/// `min(max, base * (attempt + 1))`, optionally jittered
#[must_use]
pub fn linear(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    BackoffStrategy::Linear.delay(attempt, base, max, jitter)
}

/// `min(max, base)`, optionally jittered
#[must_use]
pub fn constant(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    BackoffStrategy::Constant.delay(attempt, base, max, jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_secs(2);

    #[rstest]
    #[case(BackoffStrategy::Exponential, 0, 100)]
    #[case(BackoffStrategy::Exponential, 1, 200)]
    #[case(BackoffStrategy::Exponential, 4, 1600)]
    #[case(BackoffStrategy::Exponential, 5, 2000)]
    #[case(BackoffStrategy::Linear, 0, 100)]
    #[case(BackoffStrategy::Linear, 2, 300)]
    #[case(BackoffStrategy::Linear, 40, 2000)]
    #[case(BackoffStrategy::Constant, 0, 100)]
    #[case(BackoffStrategy::Constant, 9, 100)]
    fn raw_delays(#[case] strategy: BackoffStrategy, #[case] attempt: u32, #[case] millis: u64) {
        assert_eq!(
            strategy.raw_delay(attempt, BASE, MAX),
            Duration::from_millis(millis)
        );
    }

    #[test]
    fn huge_attempts_saturate() {
        assert_eq!(exponential(u32::MAX, BASE, MAX, false), MAX);
        assert_eq!(linear(u32::MAX, BASE, MAX, false), MAX);
        assert_eq!(
            exponential(200, Duration::MAX, Duration::MAX, true),
            Duration::MAX
        );
    }

    #[test]
    fn jitter_stays_within_half_and_cap() {
        let mut rng = fastrand::Rng::with_seed(7);
        for attempt in 0..12 {
            let raw = BackoffStrategy::Exponential.raw_delay(attempt, BASE, MAX);
            let jittered =
                BackoffStrategy::Exponential.delay_with_rng(attempt, BASE, MAX, true, &mut rng);
            assert!(jittered <= MAX);
            assert!(jittered >= raw / 2);
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let draw = |seed| {
            let mut rng = fastrand::Rng::with_seed(seed);
            (0..5)
                .map(|n| BackoffStrategy::Linear.delay_with_rng(n, BASE, MAX, true, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[test]
    fn strategy_names_round_trip_through_serde() {
        let json = serde_json::to_string(&BackoffStrategy::Constant).unwrap();
        assert_eq!(json, "\"constant\"");
        let back: BackoffStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BackoffStrategy::Constant);
        assert_eq!(BackoffStrategy::default().to_string(), "exponential");
    }
}
