//! A policy-enforcing gateway for Ethereum JSON-RPC nodes, built on [Hyper].
//!
//! Every inbound call is parsed, checked against per-(client, method)
//! token buckets and method-specific payload rules, and either rejected
//! with a JSON-RPC error or forwarded verbatim to a single upstream node.
//!
//! - **Rate limiting**: continuous-refill token buckets keyed by client IP
//!   and method, created lazily and swept once idle.
//! - **Gas-price floor**: `eth_sendRawTransaction` payloads are decoded and
//!   their gas price (or max fee per gas) compared to a configured minimum.
//! - **Log range ceiling**: `eth_getLogs` filters spanning more blocks than
//!   allowed are refused.
//! - **Hot reload**: the admission policy is re-read from disk on an
//!   interval and swapped in atomically.
//! - **Metrics**: accept and reject counters in the Prometheus text format.
//!
//! [Hyper]: https://hyper.rs/

pub mod config;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod proxy;
pub mod rate_limit;
pub mod rpc;
pub mod server;
pub mod telemetry;
pub mod validate;

pub use config::{Config, RateLimitConfig, RuntimeConfig};
pub use error::{GuardError, Rejection};
pub use pipeline::{Admission, GuardContext, admit};
pub use policy::{Policy, PolicyStore, spawn_policy_refresher};
pub use proxy::{
    BoxBody, HttpClient, HttpsClient, build_client, build_https_client, handle_request,
};
pub use rate_limit::{LimiterRegistry, RateLimitParams, TokenBucket};
pub use rpc::{RpcErrorResponse, RpcRequest};
pub use server::{ServerState, serve, shutdown_signal, spawn_limiter_sweep};
pub use telemetry::Telemetry;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GuardError>;
