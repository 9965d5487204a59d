//! JSON-RPC 2.0 request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::Rejection;

/// Protocol version written on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// A request id kept as the exact bytes the client sent. `None` covers
/// both an absent id and an explicit `null`.
pub type RequestId = Option<Box<RawValue>>;

/// An inbound JSON-RPC call.
///
/// Only `method` is required. `jsonrpc` is passed through without
/// validation, `params` may be absent or `null`, and `id` is echoed
/// verbatim (an absent id becomes `null`).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Vec<Value>>,
    #[serde(default)]
    pub id: RequestId,
}

impl RpcRequest {
    /// Parses a request body.
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    /// The positional parameters, empty when absent.
    pub fn params(&self) -> &[Value] {
        self.params.as_deref().unwrap_or_default()
    }
}

/// The error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC error response produced by the gateway itself.
#[derive(Debug, Clone, Serialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: RpcError,
}

impl RpcErrorResponse {
    pub fn rejection(id: RequestId, rejection: Rejection) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            error: RpcError {
                code: Rejection::CODE,
                message: rejection.to_string(),
            },
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // Serializing plain strings and JSON values cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
