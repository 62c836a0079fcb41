//! chainstate-rpc: adaptive rate-limited JSON-RPC transport.
//!
//! # Architecture
//!
//! ```text
//! RateLimitedTransport<T>
//!   ├── AdaptiveRateLimiter   FIFO admission, AIMD rate
//!   ├── BackoffPolicy         exponential backoff + jitter, Retry-After aware
//!   └── T: RpcTransport       one attempt per send (HTTP, mock, ...)
//! ```
//!
//! The wrapper itself implements [`RpcTransport`], so it composes with
//! other layers.

pub mod config;
pub mod error;
pub mod limited;
pub mod policy;
pub mod request;
pub mod transport;

pub use config::TransportConfig;
pub use error::{ConfigError, TransportError};
pub use limited::RateLimitedTransport;
pub use policy::{AdaptiveRateLimiter, AimdConfig, BackoffPolicy, Permit, RateSnapshot};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
