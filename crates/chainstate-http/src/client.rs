//! HTTP JSON-RPC transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use thiserror::Error;

use chainstate_rpc::request::{JsonRpcRequest, JsonRpcResponse};
use chainstate_rpc::{RpcTransport, TransportError};

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Deadline for one HTTP exchange, body included.
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Errors constructing an [`HttpTransport`].
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid endpoint URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Single-attempt JSON-RPC over HTTP POST.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, config: HttpConfig) -> Result<Self, HttpError> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|e| HttpError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            url,
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, HttpError> {
        Self::new(url, HttpConfig::default())
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Parse a `Retry-After` header given as delta-seconds.
///
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Map a non-success status to a transport error.
fn status_error(status: StatusCode, retry_after: Option<&str>, body: &str) -> TransportError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return TransportError::RateLimited {
            retry_after: retry_after.and_then(parse_retry_after),
        };
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return TransportError::Network(format!("HTTP {}: {body}", status.as_u16()));
    }
    TransportError::InvalidResponse(format!("HTTP {}: {body}", status.as_u16()))
}

fn decode(body: &[u8]) -> Result<JsonRpcResponse, TransportError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| TransportError::InvalidResponse("response is not a JSON object".into()))?;
    if object.get("jsonrpc").and_then(|v| v.as_str()) != Some("2.0") {
        return Err(TransportError::InvalidResponse(format!(
            "unsupported jsonrpc version {:?}",
            object.get("jsonrpc")
        )));
    }
    // A `null` result is valid, so check for the key rather than the value.
    if !object.contains_key("result") && !object.contains_key("error") {
        return Err(TransportError::InvalidResponse(
            "response has neither result nor error".into(),
        ));
    }
    serde_json::from_value(value).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(
                status = status.as_u16(),
                retry_after = retry_after.as_deref(),
                url = %self.url,
                "non-success HTTP status"
            );
            return Err(status_error(status, retry_after.as_deref(), &body));
        }

        let body = resp.bytes().await.map_err(|e| self.map_reqwest(e))?;
        decode(&body)
    }

    fn url(&self) -> &str {
        &self.url
    }
}
