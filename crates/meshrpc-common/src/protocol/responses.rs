//! RPC response type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RequestId;

/// An RPC response returned from a server to the client.
///
/// Exactly one of `result`/`error` is meaningful: a populated `error` means
/// the call failed inside the remote service implementation and `result`
/// must be ignored. The error travels as a plain string, not a structured
/// value, which keeps remote failures deliberately lossy.
///
/// # Example
///
/// ```
/// use meshrpc_common::RpcResponse;
/// use serde_json::json;
///
/// let ok = RpcResponse::success(123, json!("Hello World"));
/// assert!(ok.is_success());
///
/// let failed = RpcResponse::error(123, "division by zero");
/// assert!(!failed.is_success());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    /// Request identifier this response corresponds to.
    pub id: RequestId,
    /// Result value (present on success).
    pub result: Option<Value>,
    /// Remote failure description (present on failure).
    pub error: Option<String>,
}

impl RpcResponse {
    /// Creates a successful response echoing the request id.
    pub fn success(id: RequestId, result: Value) -> Self {
        RpcResponse {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response echoing the request id.
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        RpcResponse {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Whether the remote call succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
