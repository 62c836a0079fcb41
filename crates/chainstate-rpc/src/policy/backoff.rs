//! Exponential backoff with positive jitter.

use std::time::Duration;

use rand::Rng;

/// Computes the wait before a retry.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter_fraction: f64,
}

impl BackoffPolicy {
    /// `jitter_fraction` is clamped to `[0, 1]`.
    pub fn new(base: Duration, max: Duration, jitter_fraction: f64) -> Self {
        let jitter_fraction = if jitter_fraction.is_nan() {
            0.0
        } else {
            jitter_fraction.clamp(0.0, 1.0)
        };
        Self {
            base,
            max,
            jitter_fraction,
        }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// `base * 2^(attempt-1)`, capped at `max`, without jitter.
    pub fn exponential(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// An upstream `hint` replaces the exponential term. The result is
    /// capped at `max` and never shorter than `previous`.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>, previous: Duration) -> Duration {
        let delay = match hint {
            Some(hint) => hint.min(self.max),
            None => {
                let exp = self.exponential(attempt);
                let jitter = exp.mul_f64(self.jitter_fraction * rand::thread_rng().gen::<f64>());
                (exp + jitter).min(self.max)
            }
        };
        delay.max(previous)
    }
}
