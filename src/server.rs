//! Server accept loop, background tasks, and graceful shutdown.
//!
//! Sits between the TCP listener and the per-request handler. Kept apart
//! from `main()` so that the server can be driven from tests without
//! signal handling or `std::process::exit`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::full_body;
use crate::rate_limit::LimiterRegistry;
use crate::telemetry::METRICS_CONTENT_TYPE;
use crate::{BoxBody, GuardContext, GuardError, Result, RuntimeConfig, Telemetry, handle_request};

/// Runtime state shared across the accept loop.
pub struct ServerState {
    /// Admission state shared by all handlers.
    pub ctx: Arc<GuardContext>,
    /// Bounds the number of concurrent in-flight requests.
    pub semaphore: Arc<Semaphore>,
    /// Cached value of the semaphore capacity, used in error messages.
    pub concurrency_limit: usize,
    /// `GET` requests on this path return the metrics exposition.
    pub metrics_path: Arc<str>,
}

impl ServerState {
    pub fn new(ctx: Arc<GuardContext>, config: &RuntimeConfig) -> Self {
        Self {
            ctx,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            concurrency_limit: config.max_concurrent_requests,
            metrics_path: Arc::from(config.metrics_path.as_str()),
        }
    }
}

/// Accepts connections on `listener` and dispatches them through the
/// request handler using the given upstream `client`.
///
/// Runs until `shutdown` resolves, then stops accepting new connections
/// and returns. In-flight requests on already-spawned tasks continue
/// to completion independently.
pub async fn serve<C>(
    listener: TcpListener,
    client: hyper_util::client::legacy::Client<C, BoxBody>,
    state: ServerState,
    shutdown: impl Future<Output = ()>,
) where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let ServerState {
        ctx,
        semaphore,
        concurrency_limit,
        metrics_path,
    } = state;

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, client_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%e, "failed to accept connection");
                        continue;
                    }
                };

                let client = client.clone();
                let ctx = Arc::clone(&ctx);
                let semaphore = Arc::clone(&semaphore);
                let metrics_path = Arc::clone(&metrics_path);

                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let client = client.clone();
                        let ctx = Arc::clone(&ctx);
                        let semaphore = Arc::clone(&semaphore);
                        let metrics_path = Arc::clone(&metrics_path);
                        async move {
                            if req.method() == Method::GET && req.uri().path() == &*metrics_path {
                                return Ok::<_, Infallible>(metrics_response(&ctx.telemetry));
                            }

                            let _permit = match semaphore.try_acquire() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        limit = concurrency_limit,
                                        "concurrency limit reached, rejecting request"
                                    );
                                    let err = GuardError::ServiceUnavailable {
                                        limit: concurrency_limit,
                                    };
                                    return Ok(err.into_response());
                                }
                            };

                            let resp = handle_request(req, client, ctx, client_addr)
                                .await
                                .unwrap_or_else(GuardError::into_response);
                            Ok(resp)
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        warn!(%e, "connection error");
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutting down, no longer accepting connections");
                break;
            }
        }
    }
}

/// Renders the Prometheus exposition, or a 500 if encoding fails.
pub fn metrics_response(telemetry: &Telemetry) -> Response<BoxBody> {
    let rendered = telemetry.render().and_then(|body| {
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, METRICS_CONTENT_TYPE)
            .body(full_body(body))
            .map_err(GuardError::from)
    });
    rendered.unwrap_or_else(|e| {
        warn!(error = %e, "failed to render metrics");
        e.into_response()
    })
}

/// Spawns a background task that periodically evicts idle, fully
/// replenished buckets from the limiter registry.
pub fn spawn_limiter_sweep(
    limiters: Arc<LimiterRegistry>,
    interval: Duration,
    idle_ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let before = limiters.tracked_count();
            let pruned = limiters.retain_active(Instant::now(), idle_ttl);
            if pruned > 0 {
                info!(
                    before,
                    after = limiters.tracked_count(),
                    pruned,
                    "limiter sweep completed"
                );
            } else {
                debug!(tracked = before, "limiter sweep found nothing to prune");
            }
        }
    })
}

/// Awaits a shutdown signal (SIGINT or SIGTERM on Unix, Ctrl+C on all
/// platforms). Returns once the first signal is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
                    _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
                info!("received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received Ctrl+C, initiating graceful shutdown");
    }
}

/// Binds the configured listen address.
pub async fn bind(config: &RuntimeConfig) -> Result<TcpListener> {
    TcpListener::bind(config.listen).await.map_err(|e| {
        GuardError::Config(format!("failed to bind {}: {e}", config.listen))
    })
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use http_body_util::BodyExt;

    use super::*;
    use crate::Rejection;

    #[tokio::test]
    async fn metrics_response_exposes_counters() {
        let telemetry = Telemetry::new().unwrap();
        telemetry.record_reject(
            "eth_getLogs",
            Rejection::LogRangeTooWide,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        );

        let resp = metrics_response(&telemetry);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], METRICS_CONTENT_TYPE);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("rpcguard_rejected_total"));
        assert!(text.contains("reason=\"log_range\""));
    }
}
