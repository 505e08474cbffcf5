//! The RPC client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshrpc_common::frame::{KIND_RPC_REQUEST, KIND_RPC_RESPONSE};
use meshrpc_common::protocol::RequestId;
use meshrpc_common::{
    JsonCodec, MeshError, NetConfig, PeerAddr, RequestIdGen, Result, RpcRequest, RpcResponse,
};
use meshrpc_net::Node;

use crate::future::RpcFuture;
use crate::stub::ServiceStub;

/// A client for one remote service host.
///
/// Cheap to clone; all clones share the connection, the pending-call
/// table, and the id generator. Each client instance carries its own id
/// generator, so two clients in the same process never contend on shared
/// state.
///
/// # Example
///
/// ```no_run
/// use meshrpc_client::RpcClient;
/// use meshrpc_common::NetConfig;
/// use serde_json::json;
///
/// # async fn run() -> meshrpc_common::Result<()> {
/// let client = RpcClient::new("127.0.0.1:9001".parse()?, NetConfig::default());
/// client.connect().await?;
///
/// let greeting = client
///     .call("HelloService", "hello", vec![json!("World")])
///     .await?;
/// assert_eq!(greeting, json!("Hello World"));
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    node: Arc<Node>,
    pending: DashMap<RequestId, RpcFuture<RpcResponse>>,
    ids: RequestIdGen,
    config: NetConfig,
    cancel: CancellationToken,
    reader_started: AtomicBool,
}

impl RpcClient {
    /// Creates a client for the service host at `addr`. Nothing is dialed
    /// until [`connect`](RpcClient::connect).
    pub fn new(addr: PeerAddr, config: NetConfig) -> Self {
        let node = Arc::new(Node::new(addr, config.clone()));
        Self {
            inner: Arc::new(ClientInner {
                node,
                pending: DashMap::new(),
                ids: RequestIdGen::new(),
                config,
                cancel: CancellationToken::new(),
                reader_started: AtomicBool::new(false),
            }),
        }
    }

    /// Connects the underlying node and starts the background response
    /// reader. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        self.inner
            .node
            .connect(Some(self.inner.config.connect_timeout))
            .await?;
        if self
            .inner
            .reader_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let inner = self.inner.clone();
            tokio::spawn(response_loop(inner));
        }
        Ok(())
    }

    /// Calls `service.method(args)` and waits for the response.
    ///
    /// Blocks until the response arrives, however long that takes; use
    /// [`call_timeout`](RpcClient::call_timeout) to bound the wait. A
    /// request that was sent just before a connection drop is never
    /// retried, so an unbounded call can outlive the connection it was
    /// sent on.
    ///
    /// # Errors
    ///
    /// [`MeshError::Remote`] if the remote implementation failed; other
    /// variants for local failures (not connected, serialization).
    pub async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let (_, future) = self.send_request(service, method, args).await?;
        let response = future.get().await;
        unwrap_response(response)
    }

    /// Like [`call`](RpcClient::call), but gives up after `timeout`.
    ///
    /// On timeout the pending entry is dropped, so a response that shows
    /// up later is silently discarded by the reader.
    pub async fn call_timeout(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (id, future) = self.send_request(service, method, args).await?;
        match future.get_timeout(timeout).await {
            Ok(response) => unwrap_response(response),
            Err(e) => {
                self.inner.pending.remove(&id);
                Err(e)
            }
        }
    }

    /// Returns a typed stub handle for one remote service.
    pub fn service(&self, name: impl Into<String>) -> ServiceStub {
        ServiceStub::new(self.clone(), name)
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Stops the response reader and disconnects.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.node.disconnect(false).await;
    }

    async fn send_request(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(RequestId, RpcFuture<RpcResponse>)> {
        if self.inner.cancel.is_cancelled() {
            return Err(MeshError::Closed);
        }
        let id = self.inner.ids.next();
        let request = RpcRequest::new(id, service, method, args);
        let payload = JsonCodec::encode_request(&request)?;

        // The future must be registered before the request can reach the
        // wire, or a fast response could find no pending entry.
        let future = RpcFuture::new();
        self.inner.pending.insert(id, future.clone());
        if let Err(e) = self.inner.node.send_frame(KIND_RPC_REQUEST, &payload).await {
            self.inner.pending.remove(&id);
            return Err(e);
        }
        Ok((id, future))
    }
}

fn unwrap_response(response: RpcResponse) -> Result<Value> {
    match response.error {
        Some(message) => Err(MeshError::Remote(message)),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

/// Background reader: frames in responses and completes pending futures.
/// On a read failure while the client is still open, recovers with a
/// disconnect + reconnect cycle; pending futures stay pending across the
/// reconnect and resolve only if their response eventually arrives.
async fn response_loop(inner: Arc<ClientInner>) {
    loop {
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = inner.node.recv_frame() => res,
        };
        match result {
            Ok(Some((KIND_RPC_RESPONSE, payload))) => {
                match JsonCodec::decode_response(&payload) {
                    Ok(response) => {
                        if let Some((_, future)) = inner.pending.remove(&response.id) {
                            future.set(response);
                        } else {
                            debug!(id = response.id, "discarding response with no pending call");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to decode response"),
                }
            }
            Ok(Some((kind, _))) => {
                debug!(kind, "ignoring frame of unexpected kind");
            }
            Ok(None) => {
                if !reconnect(&inner).await {
                    break;
                }
            }
            Err(e) => {
                if inner.cancel.is_cancelled() {
                    break;
                }
                warn!(error = %e, "response stream failed");
                if !reconnect(&inner).await {
                    break;
                }
            }
        }
    }
}

async fn reconnect(inner: &Arc<ClientInner>) -> bool {
    inner.node.disconnect(false).await;
    loop {
        if inner.cancel.is_cancelled() {
            return false;
        }
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => return false,
            res = inner.node.connect(Some(inner.config.connect_timeout)) => res,
        };
        match result {
            Ok(()) => {
                info!(peer = %inner.node.addr(), "reconnected to service host");
                return true;
            }
            Err(e) => debug!(error = %e, "reconnect attempt failed"),
        }
        tokio::select! {
            _ = inner.cancel.cancelled() => return false,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_success() {
        let response = RpcResponse::success(1, json!("value"));
        assert_eq!(unwrap_response(response).unwrap(), json!("value"));
    }

    #[test]
    fn test_unwrap_missing_result_is_null() {
        let response = RpcResponse {
            id: 1,
            result: None,
            error: None,
        };
        assert_eq!(unwrap_response(response).unwrap(), Value::Null);
    }

    #[test]
    fn test_unwrap_remote_error() {
        let response = RpcResponse::error(1, "boom");
        match unwrap_response(response) {
            Err(MeshError::Remote(message)) => assert_eq!(message, "boom"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_without_connection_fails_fast() {
        let client = RpcClient::new(PeerAddr::new("127.0.0.1", 1), NetConfig::default());
        let result = client.call("S", "m", vec![]).await;
        assert!(matches!(result, Err(MeshError::NotConnected)));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_after_close_is_closed() {
        let client = RpcClient::new(PeerAddr::new("127.0.0.1", 1), NetConfig::default());
        client.close().await;
        assert!(matches!(
            client.call("S", "m", vec![]).await,
            Err(MeshError::Closed)
        ));
    }
}
