//! Transport-level error types.

use std::time::Duration;

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The upstream asked us to slow down (HTTP 429 or an equivalent
    /// JSON-RPC error), optionally saying for how long.
    #[error("rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Connection refused/reset, DNS failure, 5xx, etc.
    #[error("network error: {0}")]
    Network(String),

    /// The attempt did not complete within the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The upstream answered with something that is not a JSON-RPC
    /// response, or a result that does not deserialize.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The per-request attempt budget ran out on retryable errors.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Timeout { .. }
        )
    }

    /// Returns `true` if the upstream signalled rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Rpc(e) => e.is_rate_limit(),
            _ => false,
        }
    }

    /// Returns `true` if this is a node-side execution error (not retryable).
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }
}

/// Errors in a transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid transport config: {field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
