//! Error types and HTTP status code mapping.
//!
//! Two layers of failure exist. [`GuardError`] covers transport-level
//! outcomes that never reach (or come after) the admission pipeline and
//! are answered with a plain-text HTTP error. [`Rejection`] covers
//! policy decisions, which are answered with a JSON-RPC error body over
//! HTTP 200.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};

use crate::BoxBody;

/// Every transport-level failure the gateway can produce, each mapping to
/// a specific HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The configuration file could not be loaded, parsed or validated.
    #[error("configuration error: {0}")]
    Config(String),
    /// The upstream target URI is malformed or unparseable.
    #[error("invalid upstream: {0}")]
    InvalidUpstream(String),
    /// The request body is not a JSON-RPC request envelope.
    #[error("invalid JSON-RPC: {0}")]
    MalformedEnvelope(String),
    /// The request body exceeds the configured size limit.
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: u64 },
    /// The upstream node could not be reached or dropped the connection.
    #[error("upstream RPC failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    /// The upstream node did not answer within the request timeout.
    #[error("upstream RPC timed out after {0:?}")]
    UpstreamTimeout(Duration),
    /// Too many requests are already in flight.
    #[error("service unavailable: {limit} requests in flight")]
    ServiceUnavailable { limit: usize },
    /// An internal error that does not fit other categories.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Returns the HTTP status code corresponding to this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::InvalidUpstream(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::MalformedEnvelope(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) | Self::UpstreamTimeout(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Converts this error into a plain-text HTTP response.
    pub fn into_response(self) -> Response<BoxBody> {
        let status = self.status_code();
        Response::builder()
            .status(status)
            .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(full_body(self.to_string()))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(full_body(Bytes::new()));
                *fallback.status_mut() = status;
                fallback
            })
    }
}

impl From<hyper::http::Error> for GuardError {
    fn from(err: hyper::http::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A policy decision that stops a request before it is forwarded.
///
/// The `Display` text is the client-facing JSON-RPC error message and is
/// part of the public contract; [`Rejection::reason`] is the telemetry label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Too many requests")]
    RateLimited,
    #[error("Missing tx param")]
    MissingParam,
    #[error("Gas price too low")]
    LowGasPrice,
    #[error("Log range too wide")]
    LogRangeTooWide,
    /// Only produced with `strict_decoding` enabled.
    #[error("Invalid tx encoding")]
    MalformedTransaction,
    /// Only produced with `strict_decoding` enabled.
    #[error("Invalid log filter")]
    MalformedFilter,
}

impl Rejection {
    /// JSON-RPC error code carried by every rejection.
    pub const CODE: i64 = -32000;

    /// Stable label used for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::MissingParam => "no_param",
            Self::LowGasPrice => "low_gas_price",
            Self::LogRangeTooWide => "log_range",
            Self::MalformedTransaction => "malformed_tx",
            Self::MalformedFilter => "malformed_filter",
        }
    }
}

/// Wraps owned bytes into the crate's boxed body type.
pub(crate) fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
        .boxed()
}
