//! Admission and retry policies.

pub mod aimd;
pub mod backoff;

pub use aimd::{AdaptiveRateLimiter, AimdConfig, Permit, RateSnapshot};
pub use backoff::BackoffPolicy;
