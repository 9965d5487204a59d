//! Per-request handler: body limit, envelope parsing, admission and
//! forwarding.
//!
//! Every inbound request is assigned a monotonically increasing request ID
//! and wrapped in a [`tracing::Span`] carrying the client address.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, warn};

use crate::error::full_body;
use crate::pipeline::{Admission, GuardContext, admit};
use crate::rpc::{RequestId, RpcErrorResponse, RpcRequest};
use crate::{GuardError, Rejection, Result, RuntimeConfig};

/// An alias to simplify the calls to `Box<dyn std::error::Error + Send + Sync>`.
type StdError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased body used for both forwarded requests and relayed
/// responses.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, StdError>;

/// The HTTP client type for plain TCP upstream connections.
pub type HttpClient = Client<HttpConnector, BoxBody>;

/// The HTTPS client type, also able to reach plain `http://` upstreams.
pub type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody>;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Global monotonic counter for assigning unique request IDs.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Constructs a new [`HttpClient`] for plain HTTP upstream connections.
pub fn build_client(config: &RuntimeConfig) -> HttpClient {
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .build(http_connector(config.connect_timeout))
}

/// Constructs a new [`HttpsClient`]. Server certificates are verified
/// against the Mozilla root store from [`webpki_roots`].
pub fn build_https_client(config: &RuntimeConfig) -> HttpsClient {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector(config.connect_timeout));

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .build(connector)
}

fn http_connector(connect_timeout: Duration) -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    // The TLS layer needs to see `https://` URIs.
    connector.enforce_http(false);
    connector
}

/// Processes a single inbound JSON-RPC request.
///
/// 1. The body is collected up to `max_body_size` (413 beyond it) and
///    parsed as a JSON-RPC envelope (400 if that fails).
/// 2. The request goes through [`admit`] with the peer IP as identity.
/// 3. A rejection is answered with a JSON-RPC error over HTTP 200.
/// 4. An admitted request has its original bytes POSTed to the upstream of
///    the policy snapshot it was admitted under. Status, content type and
///    body are relayed. Transport failure or timeout yields 502.
pub async fn handle_request<B, C>(
    req: Request<B>,
    client: Client<C, BoxBody>,
    ctx: Arc<GuardContext>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody>>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<StdError>,
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let request_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);

    let span = tracing::info_span!(
        "request",
        id = request_id,
        client = %client_addr,
    );

    async move {
        let body = read_body(req, ctx.max_body_size).await?;

        let rpc = RpcRequest::from_slice(&body).map_err(|e| {
            debug!(error = %e, "request body is not a JSON-RPC call");
            GuardError::MalformedEnvelope(e.to_string())
        })?;

        match admit(&ctx, &rpc, client_addr.ip()) {
            Admission::Reject(rejection) => rejection_response(rpc.id, rejection),
            Admission::Forward(policy) => {
                forward(&client, &policy.upstream, &rpc.method, body, ctx.request_timeout).await
            }
        }
    }
    .instrument(span)
    .await
}

/// Collects the request body, refusing anything over `limit` bytes.
async fn read_body<B>(req: Request<B>, limit: u64) -> Result<Bytes>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<StdError>,
{
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        warn!(content_length = declared, limit, "request body exceeds size limit");
        return Err(GuardError::BodyTooLarge { limit });
    }

    let limited = Limited::new(req.into_body(), usize::try_from(limit).unwrap_or(usize::MAX));
    match limited.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(limit, "streamed request body exceeds size limit");
            Err(GuardError::BodyTooLarge { limit })
        }
        Err(e) => Err(GuardError::MalformedEnvelope(format!(
            "failed to read request body: {e}"
        ))),
    }
}

/// Builds the HTTP 200 JSON-RPC error answer for a policy rejection.
fn rejection_response(id: RequestId, rejection: Rejection) -> Result<Response<BoxBody>> {
    let body = RpcErrorResponse::rejection(id, rejection).to_vec();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(full_body(body))?)
}

/// Sends `body` to `upstream` once and relays the answer.
async fn forward<C>(
    client: &Client<C, BoxBody>,
    upstream: &Uri,
    method: &str,
    body: Bytes,
    request_timeout: Duration,
) -> Result<Response<BoxBody>>
where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    let upstream_req = Request::builder()
        .method(Method::POST)
        .uri(upstream.clone())
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(full_body(body))?;

    let start = Instant::now();
    let upstream_resp = match timeout(request_timeout, client.request(upstream_req)).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            warn!(
                error = %e,
                latency_ms = start.elapsed().as_millis() as u64,
                %upstream,
                method,
                "upstream request failed"
            );
            return Err(GuardError::Upstream(e));
        }
        Err(_elapsed) => {
            warn!(
                timeout = ?request_timeout,
                %upstream,
                method,
                "upstream request timed out"
            );
            return Err(GuardError::UpstreamTimeout(request_timeout));
        }
    };

    info!(
        status = upstream_resp.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        method,
        "upstream responded"
    );

    let (parts, body) = upstream_resp.into_parts();
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(JSON_CONTENT_TYPE));

    Ok(Response::builder()
        .status(parts.status)
        .header(CONTENT_TYPE, content_type)
        .body(body.map_err(|e| -> StdError { Box::new(e) }).boxed())?)
}
