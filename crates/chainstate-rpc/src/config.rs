//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policy::aimd::MIN_RATE;
use crate::policy::{AimdConfig, BackoffPolicy};

/// Tuning for [`crate::RateLimitedTransport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Starting admission rate, requests per second.
    #[serde(default = "default_initial_rate")]
    pub initial_rate: f64,
    #[serde(default = "default_min_rate")]
    pub min_rate: f64,
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    /// Additive increase after a success streak.
    #[serde(default = "default_increase_step")]
    pub increase_step: f64,
    /// Multiplicative decrease on a rate-limited response.
    #[serde(default = "default_decrease_factor")]
    pub decrease_factor: f64,
    #[serde(default = "default_success_streak")]
    pub success_streak_for_increase: u32,
    /// Total attempts per logical request, first try included.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Fraction of the backoff added as random jitter; clamped to `[0, 1]`.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Optional per-attempt deadline.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

fn default_initial_rate() -> f64 { 10.0 }
fn default_min_rate() -> f64 { 1.0 }
fn default_max_rate() -> f64 { 50.0 }
fn default_increase_step() -> f64 { 1.0 }
fn default_decrease_factor() -> f64 { 0.5 }
fn default_success_streak() -> u32 { 10 }
fn default_retry_count() -> u32 { 5 }
fn default_base_backoff_ms() -> u64 { 250 }
fn default_max_backoff_ms() -> u64 { 10_000 }
fn default_jitter_fraction() -> f64 { 0.2 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initial_rate: default_initial_rate(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            increase_step: default_increase_step(),
            decrease_factor: default_decrease_factor(),
            success_streak_for_increase: default_success_streak(),
            retry_count: default_retry_count(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_fraction: default_jitter_fraction(),
            attempt_timeout_ms: None,
        }
    }
}

impl TransportConfig {
    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("initial_rate", self.initial_rate),
            ("min_rate", self.min_rate),
            ("max_rate", self.max_rate),
            ("increase_step", self.increase_step),
            ("decrease_factor", self.decrease_factor),
            ("jitter_fraction", self.jitter_fraction),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::invalid(field, "must be finite"));
            }
            if value < 0.0 {
                return Err(ConfigError::invalid(field, format!("must not be negative, got {value}")));
            }
        }
        if self.min_rate < MIN_RATE {
            return Err(ConfigError::invalid(
                "min_rate",
                format!("must be at least {MIN_RATE}, got {}", self.min_rate),
            ));
        }
        if self.min_rate > self.max_rate {
            return Err(ConfigError::invalid(
                "min_rate",
                format!("{} exceeds max_rate {}", self.min_rate, self.max_rate),
            ));
        }
        if self.initial_rate < self.min_rate || self.initial_rate > self.max_rate {
            return Err(ConfigError::invalid(
                "initial_rate",
                format!(
                    "{} outside [{}, {}]",
                    self.initial_rate, self.min_rate, self.max_rate
                ),
            ));
        }
        if self.decrease_factor <= 0.0 || self.decrease_factor >= 1.0 {
            return Err(ConfigError::invalid(
                "decrease_factor",
                format!("{} outside (0, 1)", self.decrease_factor),
            ));
        }
        if self.success_streak_for_increase == 0 {
            return Err(ConfigError::invalid("success_streak_for_increase", "must be at least 1"));
        }
        if self.retry_count == 0 {
            return Err(ConfigError::invalid("retry_count", "must be at least 1"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::invalid(
                "base_backoff_ms",
                format!("{} exceeds max_backoff_ms {}", self.base_backoff_ms, self.max_backoff_ms),
            ));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("attempt_timeout_ms", "must be positive when set"));
        }
        Ok(())
    }

    pub fn aimd(&self) -> AimdConfig {
        AimdConfig {
            initial_rate: self.initial_rate,
            min_rate: self.min_rate,
            max_rate: self.max_rate,
            increase_step: self.increase_step,
            decrease_factor: self.decrease_factor,
            success_streak_for_increase: self.success_streak_for_increase,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.jitter_fraction,
        )
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}
