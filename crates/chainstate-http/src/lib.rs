//! chainstate-http: HTTP JSON-RPC leaf transport backed by `reqwest`.
//!
//! [`HttpTransport`] makes exactly one POST per `send` and classifies the
//! outcome into [`chainstate_rpc::TransportError`]; retries and admission
//! control belong to [`chainstate_rpc::RateLimitedTransport`].

pub mod client;

pub use client::{parse_retry_after, HttpConfig, HttpError, HttpTransport};
