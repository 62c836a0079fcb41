//! Adaptive (AIMD) admission control.
//!
//! Callers queue on a fair async mutex, so admission is FIFO. The head of
//! the queue dispatches once `1/rate` has elapsed since the previous
//! dispatch; the rate is re-read after every wake-up, so a decrease that
//! lands while a caller is sleeping pushes its dispatch further out.
//!
//! The rate moves additively up after a streak of successes and
//! multiplicatively down on rate-limited responses. Each decrease starts a
//! new epoch; a rate-limited response to a request admitted in an older
//! epoch does not decrease again.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Lowest rate [`crate::TransportConfig`] accepts: one request per ~11.6 days.
pub const MIN_RATE: f64 = 1e-6;

/// Longest spacing between dispatches, whatever the configured rate.
const MAX_INTERVAL: Duration = Duration::from_secs(1_000_000);

fn interval(rate: f64) -> Duration {
    Duration::try_from_secs_f64(1.0 / rate)
        .unwrap_or(MAX_INTERVAL)
        .min(MAX_INTERVAL)
}

/// AIMD parameters. Built from [`crate::TransportConfig::aimd`].
#[derive(Debug, Clone, PartialEq)]
pub struct AimdConfig {
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub increase_step: f64,
    pub decrease_factor: f64,
    pub success_streak_for_increase: u32,
}

/// Read-only view of the limiter state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSnapshot {
    /// Requests per second.
    pub rate: f64,
    pub streak: u32,
    pub epoch: u64,
}

/// Proof of admission; remembers the epoch it was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    epoch: u64,
}

impl Permit {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

struct LimiterState {
    rate: f64,
    streak: u32,
    epoch: u64,
    last_dispatch: Option<Instant>,
}

/// Thread-safe AIMD rate limiter.
pub struct AdaptiveRateLimiter {
    config: AimdConfig,
    queue: tokio::sync::Mutex<()>,
    state: Mutex<LimiterState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: AimdConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                rate: config.initial_rate,
                streak: 0,
                epoch: 0,
                last_dispatch: None,
            }),
            queue: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Wait for this caller's turn and its dispatch slot.
    pub async fn acquire(&self) -> Permit {
        let _turn = self.queue.lock().await;
        loop {
            let due = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let due = state
                    .last_dispatch
                    .map(|last| last + interval(state.rate));
                match due {
                    Some(due) if due > now => due,
                    _ => {
                        state.last_dispatch = Some(now);
                        return Permit { epoch: state.epoch };
                    }
                }
            };
            tokio::time::sleep_until(due).await;
        }
    }

    /// Record a successful response.
    pub fn on_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.streak += 1;
        if state.streak >= self.config.success_streak_for_increase {
            state.streak = 0;
            let previous = state.rate;
            state.rate = (state.rate + self.config.increase_step).min(self.config.max_rate);
            if state.rate > previous {
                info!(from = previous, to = state.rate, "increasing request rate");
            }
        }
    }

    /// Record a rate-limited response to the request admitted with `permit`.
    ///
    /// Returns `true` if the rate was decreased.
    pub fn on_rate_limited(&self, permit: &Permit) -> bool {
        let mut state = self.state.lock().unwrap();
        state.streak = 0;
        if permit.epoch != state.epoch {
            return false;
        }
        let previous = state.rate;
        state.rate = (state.rate * self.config.decrease_factor).max(self.config.min_rate);
        state.epoch += 1;
        warn!(from = previous, to = state.rate, epoch = state.epoch, "decreasing request rate");
        true
    }

    /// Record a non-throttling failure.
    pub fn on_failure(&self) {
        self.state.lock().unwrap().streak = 0;
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let state = self.state.lock().unwrap();
        RateSnapshot {
            rate: state.rate,
            streak: state.streak,
            epoch: state.epoch,
        }
    }

    pub fn config(&self) -> &AimdConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(AimdConfig {
            initial_rate: 4.0,
            min_rate: 1.0,
            max_rate: 6.0,
            increase_step: 1.0,
            decrease_factor: 0.5,
            success_streak_for_increase: 3,
        })
    }

    #[test]
    fn increases_after_streak_up_to_max() {
        let l = limiter();
        l.on_success();
        l.on_success();
        assert_eq!(l.snapshot().rate, 4.0);
        l.on_success();
        assert_eq!(l.snapshot(), RateSnapshot { rate: 5.0, streak: 0, epoch: 0 });
        for _ in 0..9 {
            l.on_success();
        }
        assert_eq!(l.snapshot().rate, 6.0);
    }

    #[test]
    fn failure_resets_streak_only() {
        let l = limiter();
        l.on_success();
        l.on_success();
        l.on_failure();
        l.on_success();
        assert_eq!(l.snapshot(), RateSnapshot { rate: 4.0, streak: 1, epoch: 0 });
    }

    #[test]
    fn interval_is_bounded() {
        assert_eq!(interval(4.0), Duration::from_millis(250));
        assert!(interval(MIN_RATE) > Duration::from_secs(999_999));
        assert_eq!(interval(1e-20), MAX_INTERVAL);
        assert_eq!(interval(0.0), MAX_INTERVAL);
        assert_eq!(interval(f64::NAN), MAX_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn tiny_rate_waits_instead_of_panicking() {
        let l = AdaptiveRateLimiter::new(AimdConfig {
            initial_rate: 1e-20,
            min_rate: 1e-20,
            max_rate: 1.0,
            increase_step: 1.0,
            decrease_factor: 0.5,
            success_streak_for_increase: 1,
        });
        let _first = l.acquire().await;
        let second = tokio::time::timeout(Duration::from_secs(3600), l.acquire()).await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn decrease_once_per_epoch_and_floor() {
        let l = limiter();
        let a = l.acquire().await;
        let b = l.acquire().await;
        assert!(l.on_rate_limited(&a));
        assert!(!l.on_rate_limited(&b));
        assert_eq!(l.snapshot(), RateSnapshot { rate: 2.0, streak: 0, epoch: 1 });

        let c = l.acquire().await;
        assert_eq!(c.epoch(), 1);
        assert!(l.on_rate_limited(&c));
        let d = l.acquire().await;
        assert!(l.on_rate_limited(&d));
        assert_eq!(l.snapshot().rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_dispatches_by_rate() {
        let l = limiter();
        let start = Instant::now();
        l.acquire().await;
        l.acquire().await;
        l.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(510), "{elapsed:?}");
    }
}
