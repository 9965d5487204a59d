//! Configuration loading, validation, and pre-computed runtime state.
//!
//! The gateway reads one YAML file (JSON is accepted too, being a YAML
//! subset). Listener and connection-pool settings are read once at
//! startup. The admission policy part of the same file is re-read on
//! every refresh tick and swapped in as a new [`Policy`] snapshot; see
//! [`crate::policy`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitParams;
use crate::{GuardError, Policy, Result};

/// Default maximum request body size: 10 MiB.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;

/// Default connect timeout for establishing upstream TCP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default total request timeout covering the entire upstream round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout for pooled connections before they are closed.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum number of idle connections kept per upstream host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 32;

/// Default maximum number of concurrent in-flight requests the gateway
/// will handle before returning 503 Service Unavailable.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 1000;

/// Default socket address the gateway binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:18545";

/// Default path serving the Prometheus text exposition.
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Default period between policy reloads from disk.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);

/// Default period between limiter registry sweeps.
pub const DEFAULT_LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle time after which a fully replenished bucket may be evicted.
pub const DEFAULT_LIMITER_IDLE_TTL: Duration = Duration::from_secs(600);

/// Raw configuration as deserialized from the config file.
///
/// This struct maps directly to the on-disk schema. After loading, it is
/// transformed into a [`RuntimeConfig`] (startup) or a [`Policy`]
/// (every refresh).
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Socket address the gateway listens on (default `"127.0.0.1:18545"`).
    #[serde(default)]
    pub listen: Option<String>,
    /// JSON-RPC endpoint accepted requests are forwarded to.
    #[serde(default, alias = "geth_rpc")]
    pub upstream: Option<String>,
    /// Gas-price floor for `eth_sendRawTransaction`, in gwei.
    #[serde(default)]
    pub min_gas_price_gwei: u64,
    /// Widest `toBlock - fromBlock` span accepted by `eth_getLogs`.
    #[serde(default)]
    pub log_block_range_limit: u64,
    /// Per-method rate limits. Methods not listed are unthrottled.
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,
    /// Reject payloads that cannot be decoded instead of letting them through.
    #[serde(default)]
    pub strict_decoding: bool,
    /// Policy reload period in milliseconds (default: 3000).
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    /// Total upstream request timeout in milliseconds (default: 30000).
    /// Requests exceeding this receive 502.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds for upstream TCP connections
    /// (default: 5000).
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    /// Idle timeout in milliseconds for pooled connections (default: 60000).
    #[serde(default)]
    pub pool_idle_timeout_ms: Option<u64>,
    /// Maximum idle connections kept per upstream host (default: 32).
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
    /// Maximum allowed request body size in bytes (default: 10 MiB).
    #[serde(default)]
    pub max_body_size: Option<u64>,
    /// Maximum concurrent in-flight requests before returning 503
    /// (default: 1000).
    #[serde(default)]
    pub max_concurrent_requests: Option<usize>,
    /// Path serving Prometheus metrics (default: `/metrics`).
    #[serde(default)]
    pub metrics_path: Option<String>,
    /// Interval in milliseconds between limiter registry sweeps
    /// (default: 60000).
    #[serde(default)]
    pub limiter_sweep_interval_ms: Option<u64>,
    /// Idle time in milliseconds after which a replenished bucket is
    /// evicted (default: 600000).
    #[serde(default)]
    pub limiter_idle_ttl_ms: Option<u64>,
}

/// Rate-limit parameters for one JSON-RPC method, as written on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained refill rate in tokens per second.
    pub rate_per_sec: f64,
    /// Maximum tokens a bucket can hold.
    pub burst: f64,
}

/// Fully validated, ready-to-use configuration.
///
/// Created once at startup. The embedded `policy` seeds the
/// [`PolicyStore`](crate::PolicyStore); every other field is fixed for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Socket address the gateway binds to.
    pub listen: SocketAddr,
    /// The first admission policy.
    pub policy: Policy,
    /// Period between policy reloads.
    pub refresh_interval: Duration,
    /// Total request timeout for the upstream round-trip. Expiry yields 502.
    pub request_timeout: Duration,
    /// Connect timeout for upstream TCP connections.
    pub connect_timeout: Duration,
    /// Idle timeout for pooled upstream connections.
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per upstream host.
    pub pool_max_idle_per_host: usize,
    /// Maximum request body size in bytes. Larger bodies yield 413.
    pub max_body_size: u64,
    /// Maximum concurrent in-flight requests. Overflow yields 503.
    pub max_concurrent_requests: usize,
    /// Path serving Prometheus metrics.
    pub metrics_path: String,
    /// Period between limiter registry sweeps.
    pub limiter_sweep_interval: Duration,
    /// Idle time after which a replenished bucket may be evicted.
    pub limiter_idle_ttl: Duration,
}

/// Validates the upstream address string.
fn validate_upstream(address: Option<&str>) -> Result<hyper::Uri> {
    let address = address
        .filter(|a| !a.is_empty())
        .ok_or_else(|| GuardError::InvalidUpstream("upstream address must be set".into()))?;

    let uri = address
        .parse::<hyper::Uri>()
        .map_err(|e| GuardError::InvalidUpstream(format!("{address}: {e}")))?;

    uri.authority().ok_or_else(|| {
        GuardError::InvalidUpstream(format!("upstream URI has no authority: {address}"))
    })?;

    match uri.scheme_str() {
        Some(s) if s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https") => Ok(uri),
        _ => Err(GuardError::InvalidUpstream(format!(
            "upstream URI must use http or https: {address}"
        ))),
    }
}

fn validate_rate_limit(method: &str, limit: &RateLimitConfig) -> Result<RateLimitParams> {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    if !valid(limit.rate_per_sec) || !valid(limit.burst) {
        return Err(GuardError::Config(format!(
            "rate limit for {method} must be finite and non-negative"
        )));
    }
    Ok(RateLimitParams {
        rate: limit.rate_per_sec,
        burst: limit.burst,
    })
}

impl Config {
    /// Loads configuration from a YAML or JSON file at the given path.
    ///
    /// Returns a [`GuardError::Config`] if the file cannot be opened or
    /// its contents fail deserialization.
    pub fn load_from_file(file_path: &(impl AsRef<Path> + ?Sized)) -> Result<Self> {
        let file = std::fs::File::open(file_path).map_err(|e| {
            GuardError::Config(format!(
                "failed to open {}: {e}",
                file_path.as_ref().display()
            ))
        })?;

        serde_yaml::from_reader(file)
            .map_err(|e| GuardError::Config(format!("failed to parse config: {e}")))
    }

    /// Validates the admission-policy fields and builds a [`Policy`].
    pub fn to_policy(&self) -> Result<Policy> {
        let upstream = validate_upstream(self.upstream.as_deref())?;

        let rate_limits = self
            .rate_limits
            .iter()
            .map(|(method, limit)| Ok((method.clone(), validate_rate_limit(method, limit)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Policy {
            upstream,
            min_gas_price_gwei: self.min_gas_price_gwei,
            max_log_block_range: self.log_block_range_limit,
            rate_limits,
            strict_decoding: self.strict_decoding,
        })
    }

    /// Validates all fields, producing a [`RuntimeConfig`].
    pub fn into_runtime(self) -> Result<RuntimeConfig> {
        let policy = self.to_policy()?;

        let listen_str = self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        let listen = listen_str.parse::<SocketAddr>().map_err(|e| {
            GuardError::Config(format!("invalid listen address \"{listen_str}\": {e}"))
        })?;

        let metrics_path = self
            .metrics_path
            .unwrap_or_else(|| DEFAULT_METRICS_PATH.to_owned());
        if !metrics_path.starts_with('/') {
            return Err(GuardError::Config(format!(
                "metrics path must start with '/': {metrics_path}"
            )));
        }

        let millis = |value: Option<u64>, default: Duration| {
            value.map_or(default, Duration::from_millis)
        };

        let refresh_interval = millis(self.refresh_interval_ms, DEFAULT_REFRESH_INTERVAL);
        let limiter_sweep_interval = millis(
            self.limiter_sweep_interval_ms,
            DEFAULT_LIMITER_SWEEP_INTERVAL,
        );
        if refresh_interval.is_zero() || limiter_sweep_interval.is_zero() {
            return Err(GuardError::Config(
                "refresh and sweep intervals must be non-zero".into(),
            ));
        }

        Ok(RuntimeConfig {
            listen,
            policy,
            refresh_interval,
            request_timeout: millis(self.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT),
            connect_timeout: millis(self.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT),
            pool_idle_timeout: millis(self.pool_idle_timeout_ms, DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: self
                .pool_max_idle_per_host
                .unwrap_or(DEFAULT_POOL_MAX_IDLE_PER_HOST),
            max_body_size: self.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
            max_concurrent_requests: self
                .max_concurrent_requests
                .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS),
            metrics_path,
            limiter_sweep_interval,
            limiter_idle_ttl: millis(self.limiter_idle_ttl_ms, DEFAULT_LIMITER_IDLE_TTL),
        })
    }
}
