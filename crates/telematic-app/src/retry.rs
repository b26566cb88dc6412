//! Connect retry delays: exponential backoff with jitter.
//!
//! The delay for attempt `n` is `first * factor^n`, clamped to `max`, then
//! jittered. The base is derived from the attempt number alone, so jitter never
//! feeds back into later delays.

use std::time::Duration;

use rand::Rng;
use telematic_config::RetrySettings;

/// Randomisation applied to a backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the exact backoff delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay / 2 + random[0, delay / 2]`.
    Equal,
}

impl JitterPolicy {
    /// Apply the policy to `delay`.
    #[must_use]
    pub fn apply(self, delay: Duration) -> Duration {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rng.random_range(0..=ms)),
            Self::Equal => {
                let half = ms / 2;
                let jitter = if half == 0 {
                    0
                } else {
                    rng.random_range(0..=half)
                };
                Duration::from_millis(half + jitter)
            }
        }
    }
}

/// Retry delay policy for bus and sink connects.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay.
    pub max: Duration,
    /// Multiplicative growth per attempt.
    pub factor: f64,
    /// Randomisation applied to each delay.
    pub jitter: JitterPolicy,
}

impl BackoffPolicy {
    /// Policy from validated settings, with equal jitter.
    #[must_use]
    pub const fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            first: settings.initial,
            max: settings.max,
            factor: settings.factor,
            jitter: JitterPolicy::Equal,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-indexed).
    #[must_use]
    pub fn next(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let unclamped = self.first.as_secs_f64() * self.factor.powi(exponent);
        let base = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > self.max.as_secs_f64()
        {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn delays_grow_exponentially_without_jitter() {
        let policy = backoff(JitterPolicy::None);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn delays_clamp_to_max() {
        let policy = backoff(JitterPolicy::None);
        assert_eq!(policy.next(20), Duration::from_secs(30));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn equal_jitter_stays_within_half_and_full_delay() {
        let policy = backoff(JitterPolicy::Equal);
        for attempt in 0..12 {
            let base = backoff(JitterPolicy::None).next(attempt).as_millis();
            let delay = policy.next(attempt).as_millis();
            assert!(delay >= base / 2, "attempt {attempt}: {delay}ms below half of {base}ms");
            assert!(delay <= base, "attempt {attempt}: {delay}ms above {base}ms");
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let policy = backoff(JitterPolicy::Full);
        for attempt in 0..12 {
            assert!(policy.next(attempt) <= backoff(JitterPolicy::None).next(attempt));
        }
    }

    #[test]
    fn settings_map_onto_policy() {
        let settings = RetrySettings {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(5),
            factor: 1.5,
        };
        let policy = BackoffPolicy::from_settings(&settings);
        assert_eq!(policy.first, Duration::from_millis(250));
        assert_eq!(policy.jitter, JitterPolicy::Equal);
    }
}
