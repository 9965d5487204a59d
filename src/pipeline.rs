//! The admission state machine.
//!
//! A parsed request moves `received -> rate checked -> validated` and is
//! then either forwarded or rejected with a single [`Rejection`]. Each
//! decision emits exactly one telemetry event.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::rate_limit::LimiterRegistry;
use crate::rpc::RpcRequest;
use crate::{Policy, PolicyStore, Rejection, Result, RuntimeConfig, Telemetry, validate};

/// Everything a request needs to be admitted and forwarded.
#[derive(Debug)]
pub struct GuardContext {
    pub policy: Arc<PolicyStore>,
    pub limiters: Arc<LimiterRegistry>,
    pub telemetry: Telemetry,
    /// Bound on the upstream round-trip.
    pub request_timeout: Duration,
    /// Largest accepted request body in bytes.
    pub max_body_size: u64,
}

impl GuardContext {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            policy: Arc::new(PolicyStore::new(config.policy.clone())),
            limiters: Arc::new(LimiterRegistry::new()),
            telemetry: Telemetry::new()?,
            request_timeout: config.request_timeout,
            max_body_size: config.max_body_size,
        })
    }
}

/// Outcome of [`admit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Forward under this policy snapshot.
    Forward(Arc<Policy>),
    Reject(Rejection),
}

/// Runs the rate limit and payload checks for one request from `identity`.
///
/// The policy snapshot is taken once, so a concurrent reload never splits
/// a single decision across two policies.
pub fn admit(ctx: &GuardContext, request: &RpcRequest, identity: IpAddr) -> Admission {
    let policy = ctx.policy.snapshot();
    let method = request.method.as_str();

    let checked = check_rate(ctx, &policy, method, identity)
        .and_then(|()| validate::validate(method, request.params(), &policy));

    match checked {
        Ok(()) => {
            ctx.telemetry.record_accept(method, identity);
            debug!(method, client = %identity, "request admitted");
            Admission::Forward(policy)
        }
        Err(rejection) => {
            ctx.telemetry.record_reject(method, rejection, identity);
            warn!(
                method,
                reason = rejection.reason(),
                client = %identity,
                "request rejected"
            );
            Admission::Reject(rejection)
        }
    }
}

fn check_rate(
    ctx: &GuardContext,
    policy: &Policy,
    method: &str,
    identity: IpAddr,
) -> std::result::Result<(), Rejection> {
    let Some(params) = policy.rate_limit_for(method) else {
        return Ok(());
    };
    if ctx.limiters.get_or_create(identity, method, params).allow() {
        Ok(())
    } else {
        Err(Rejection::RateLimited)
    }
}
