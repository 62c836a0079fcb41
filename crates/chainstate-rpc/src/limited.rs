//! `RateLimitedTransport`: AIMD admission, retry and backoff over any
//! [`RpcTransport`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::TransportConfig;
use crate::error::{ConfigError, TransportError};
use crate::policy::{AdaptiveRateLimiter, BackoffPolicy};
use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

/// Wraps a transport with adaptive admission control and bounded retries.
///
/// Each logical request makes at most `retry_count` attempts. Every attempt
/// re-enters the limiter's FIFO queue.
pub struct RateLimitedTransport<T> {
    inner: T,
    limiter: AdaptiveRateLimiter,
    backoff: BackoffPolicy,
    retry_count: u32,
    attempt_timeout: Option<Duration>,
    next_id: AtomicU64,
}

impl<T: RpcTransport> RateLimitedTransport<T> {
    pub fn new(inner: T, config: TransportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            limiter: AdaptiveRateLimiter::new(config.aimd()),
            backoff: config.backoff(),
            retry_count: config.retry_count,
            attempt_timeout: config.attempt_timeout(),
            next_id: AtomicU64::new(1),
            inner,
        })
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Call `method` and return the raw result value.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .dispatch(JsonRpcRequest::new(id, method, params))
            .await?;
        resp.into_result().map_err(TransportError::Rpc)
    }

    /// Call `method` and deserialize the result.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<R, TransportError> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn attempt(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let send = self.inner.send(req.clone());
        let resp = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| TransportError::Timeout {
                    ms: limit.as_millis() as u64,
                })?,
            None => send.await,
        }?;
        if resp.error.as_ref().is_some_and(JsonRpcError::is_rate_limit) {
            return Err(TransportError::RateLimited { retry_after: None });
        }
        Ok(resp)
    }

    async fn dispatch(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut previous = Duration::ZERO;
        for attempt in 1..=self.retry_count {
            let permit = self.limiter.acquire().await;
            debug!(
                method = %req.method,
                attempt,
                rate = self.limiter.snapshot().rate,
                url = self.inner.url(),
                "dispatching request"
            );

            let e = match self.attempt(&req).await {
                Ok(resp) => {
                    self.limiter.on_success();
                    return Ok(resp);
                }
                Err(e) => e,
            };

            if e.is_rate_limited() {
                self.limiter.on_rate_limited(&permit);
            } else {
                self.limiter.on_failure();
            }
            if !e.is_retryable() {
                return Err(e);
            }
            if attempt == self.retry_count {
                error!(
                    method = %req.method,
                    attempt,
                    error = %e,
                    url = self.inner.url(),
                    "max retries exceeded"
                );
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }

            let hint = match &e {
                TransportError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.backoff.delay(attempt, hint, previous);
            previous = delay;
            warn!(
                method = %req.method,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                url = self.inner.url(),
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
        Err(TransportError::RetriesExhausted {
            attempts: 0,
            last: Box::new(TransportError::Network("retry budget is zero".into())),
        })
    }
}

#[async_trait]
impl<T: RpcTransport> RpcTransport for RateLimitedTransport<T> {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.dispatch(req).await
    }

    fn url(&self) -> &str {
        self.inner.url()
    }
}
