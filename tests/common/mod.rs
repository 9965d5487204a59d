//! Shared test infrastructure for integration tests.
//!
//! Provides throwaway JSON-RPC backends, gateway context builders,
//! request constructors, and a signed-transaction encoder used across
//! all integration test modules.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::U256;
use alloy_rlp::{Encodable, Header};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rpc_guard::{BoxBody, Config, GuardContext, HttpClient, RateLimitConfig, build_client};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// A synthetic client address used in all test invocations.
const TEST_CLIENT_ADDR: &str = "192.168.1.100:54321";

pub const GWEI: u128 = 1_000_000_000;

/// Canned upstream answer for forwarded calls.
pub const UPSTREAM_RESULT: &str = r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#;

/// Initializes a tracing subscriber for test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

pub fn test_addr() -> SocketAddr {
    TEST_CLIENT_ADDR.parse().unwrap()
}

pub fn addr_from(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, last_octet], 40000))
}

/// The plain-HTTP upstream client, built with the default pool and
/// connect timeouts.
pub fn test_client() -> HttpClient {
    let runtime = test_config(SocketAddr::from(([127, 0, 0, 1], 8545)))
        .into_runtime()
        .unwrap();
    build_client(&runtime)
}

/// Collects a [`BoxBody`] into [`Bytes`], mapping any body error to a
/// descriptive panic so test assertions remain concise.
pub async fn collect_body(body: BoxBody) -> Bytes {
    body.collect()
        .await
        .expect("failed to collect response body")
        .to_bytes()
}

pub async fn collect_json(body: BoxBody) -> Value {
    serde_json::from_slice(&collect_body(body).await).expect("response must be JSON")
}

/// A configuration pointing at `upstream` with a 1 gwei floor, a 1000
/// block log range and no rate limits.
pub fn test_config(upstream: SocketAddr) -> Config {
    Config {
        upstream: Some(format!("http://{upstream}")),
        min_gas_price_gwei: 1,
        log_block_range_limit: 1000,
        ..Default::default()
    }
}

pub fn with_rate_limit(mut config: Config, method: &str, rate_per_sec: f64, burst: f64) -> Config {
    config
        .rate_limits
        .insert(method.to_owned(), RateLimitConfig { rate_per_sec, burst });
    config
}

pub fn test_context(config: Config) -> Arc<GuardContext> {
    let runtime = config.into_runtime().expect("test config must be valid");
    Arc::new(GuardContext::new(&runtime).expect("context must build"))
}

/// Builds a JSON-RPC POST request carrying `body`.
pub fn rpc_request(body: &Value) -> Request<Full<Bytes>> {
    raw_request(body.to_string())
}

pub fn raw_request(body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::POST)
        .uri("http://gateway.local/")
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .unwrap()
}

/// Encodes a signed legacy transaction paying `gas_price` wei per gas.
pub fn legacy_tx_hex(gas_price: u128) -> String {
    let mut payload = Vec::new();
    3u64.encode(&mut payload);
    U256::from(gas_price).encode(&mut payload);
    21_000u64.encode(&mut payload);
    [0x42u8; 20].encode(&mut payload);
    U256::from(1_000u64).encode(&mut payload);
    [0u8; 0].encode(&mut payload);
    37u64.encode(&mut payload);
    U256::from(0x1234u64).encode(&mut payload);
    U256::from(0x5678u64).encode(&mut payload);
    encode_list(None, payload)
}

/// Encodes a signed EIP-1559 transaction with the given fee caps.
pub fn eip1559_tx_hex(max_priority_fee: u128, max_fee: u128) -> String {
    let mut payload = Vec::new();
    1u64.encode(&mut payload);
    3u64.encode(&mut payload);
    U256::from(max_priority_fee).encode(&mut payload);
    U256::from(max_fee).encode(&mut payload);
    21_000u64.encode(&mut payload);
    [0x42u8; 20].encode(&mut payload);
    U256::ZERO.encode(&mut payload);
    [0u8; 0].encode(&mut payload);
    Header {
        list: true,
        payload_length: 0,
    }
    .encode(&mut payload);
    1u64.encode(&mut payload);
    U256::from(0x1234u64).encode(&mut payload);
    U256::from(0x5678u64).encode(&mut payload);
    encode_list(Some(0x02), payload)
}

fn encode_list(tx_type: Option<u8>, payload: Vec<u8>) -> String {
    let mut out = Vec::new();
    out.extend(tx_type);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend(payload);
    format!("0x{}", hex::encode(out))
}

/// What a recording backend has seen.
#[derive(Debug, Default)]
pub struct Recorded {
    pub hits: AtomicUsize,
    pub bodies: parking_lot::Mutex<Vec<(String, Option<String>, Bytes)>>,
}

impl Recorded {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// (method, content-type, body) of every request received so far.
    pub fn requests(&self) -> Vec<(String, Option<String>, Bytes)> {
        self.bodies.lock().clone()
    }
}

/// Starts a local HTTP server that responds to every request with the given
/// status, content-type, and body. Returns the server address and a handle
/// to shut it down.
pub async fn start_backend(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> (SocketAddr, oneshot::Sender<()>) {
    let (addr, _recorded, tx) = start_recording_backend(status, content_type, body).await;
    (addr, tx)
}

/// Like [`start_backend`], additionally recording every request it receives.
pub async fn start_recording_backend(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> (SocketAddr, Arc<Recorded>, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let recorded = Arc::new(Recorded::default());

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind test backend");
    let addr = listener.local_addr().unwrap();

    let seen = Arc::clone(&recorded);
    tokio::spawn(async move {
        let mut shutdown = std::pin::pin!(async {
            let _ = rx.await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = result.expect("accept failed");
                    let seen = Arc::clone(&seen);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let seen = Arc::clone(&seen);
                        async move {
                            let method = req.method().to_string();
                            let received_type = req
                                .headers()
                                .get("content-type")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_owned);
                            let received = req
                                .into_body()
                                .collect()
                                .await
                                .map(|c| c.to_bytes())
                                .unwrap_or_default();
                            seen.bodies.lock().push((method, received_type, received));
                            seen.hits.fetch_add(1, Ordering::SeqCst);

                            Ok::<_, std::convert::Infallible>(
                                Response::builder()
                                    .status(status)
                                    .header("content-type", content_type)
                                    .body(Full::new(Bytes::from(body)))
                                    .expect("test response must build"),
                            )
                        }
                    });
                    tokio::spawn(async move {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
                () = &mut shutdown => break,
            }
        }
    });

    (addr, recorded, tx)
}

/// Starts a backend that sleeps for the given duration before responding.
pub async fn start_slow_backend(delay: Duration) -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind test backend");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut shutdown = std::pin::pin!(async {
            let _ = rx.await;
        });

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = result.expect("accept failed");
                    let service = service_fn(move |_req: Request<Incoming>| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, std::convert::Infallible>(
                            Response::builder()
                                .status(StatusCode::OK)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(UPSTREAM_RESULT)))
                                .expect("test response must build"),
                        )
                    });
                    tokio::spawn(async move {
                        let _ = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await;
                    });
                }
                () = &mut shutdown => break,
            }
        }
    });

    (addr, tx)
}

/// Returns an address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    listener.local_addr().unwrap()
}

/// Boxes `data` into the client body type.
pub fn boxed(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed()
}

/// Writes `contents` to a fresh temporary config file.
pub fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("failed to create temp config");
    std::fs::write(file.path(), contents).expect("failed to write temp config");
    file
}
