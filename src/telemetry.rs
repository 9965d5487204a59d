//! Accept/reject counters exposed in the Prometheus text format.
//!
//! Counters are labelled by method and client IP. Each admission decision
//! increments exactly one series.

use std::net::IpAddr;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::{GuardError, Rejection, Result};

/// Content type of the text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Owns the metric registry so that several gateways (and tests) never
/// share global state.
#[derive(Clone)]
pub struct Telemetry {
    registry: Registry,
    accepted: IntCounterVec,
    rejected: IntCounterVec,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let accepted = IntCounterVec::new(
            Opts::new("rpcguard_accepted_total", "Requests forwarded upstream"),
            &["method", "ip"],
        )
        .map_err(metric_error)?;
        let rejected = IntCounterVec::new(
            Opts::new("rpcguard_rejected_total", "Requests rejected by policy"),
            &["method", "reason", "ip"],
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(accepted.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(rejected.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            accepted,
            rejected,
        })
    }

    pub fn record_accept(&self, method: &str, ip: IpAddr) {
        let ip = ip.to_string();
        self.accepted.with_label_values(&[method, ip.as_str()]).inc();
    }

    pub fn record_reject(&self, method: &str, rejection: Rejection, ip: IpAddr) {
        let ip = ip.to_string();
        self.rejected
            .with_label_values(&[method, rejection.reason(), ip.as_str()])
            .inc();
    }

    pub fn accepted_count(&self, method: &str, ip: IpAddr) -> u64 {
        let ip = ip.to_string();
        self.accepted.with_label_values(&[method, ip.as_str()]).get()
    }

    pub fn rejected_count(&self, method: &str, rejection: Rejection, ip: IpAddr) -> u64 {
        let ip = ip.to_string();
        self.rejected
            .with_label_values(&[method, rejection.reason(), ip.as_str()])
            .get()
    }

    /// Renders every registered metric in the text exposition format.
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(metric_error)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

fn metric_error(err: prometheus::Error) -> GuardError {
    GuardError::Internal(format!("metrics: {err}"))
}
