//! The RPC server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use meshrpc_common::frame::{KIND_RPC_REQUEST, KIND_RPC_RESPONSE};
use meshrpc_common::{
    JsonCodec, MeshError, NetConfig, PeerAddr, Result, RpcRequest, RpcResponse,
};
use meshrpc_net::Node;

use crate::service::ServiceHandler;

/// Serves registered services to any number of inbound connections.
///
/// # Example
///
/// ```no_run
/// use meshrpc_common::NetConfig;
/// use meshrpc_server::{RpcServer, ServiceHandler};
/// use serde_json::json;
///
/// # async fn run() -> meshrpc_common::Result<()> {
/// let server = RpcServer::new(NetConfig::default());
/// server.add_service(
///     ServiceHandler::builder("HelloService")
///         .method("hello", 1, |args| async move {
///             let name = args[0].as_str().unwrap_or_default().to_string();
///             Ok(json!(format!("Hello {name}")))
///         })
///         .build(),
/// );
/// server.start(&"0.0.0.0:9001".parse()?).await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    registry: DashMap<String, Arc<ServiceHandler>>,
    config: NetConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    local_addr: StdMutex<Option<std::net::SocketAddr>>,
}

impl RpcServer {
    pub fn new(config: NetConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                registry: DashMap::new(),
                config,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                local_addr: StdMutex::new(None),
            }),
        }
    }

    /// Registers a service. A later registration under the same service
    /// name replaces the earlier one; requests already dispatched to the
    /// old implementation run to completion.
    pub fn add_service(&self, service: ServiceHandler) {
        let name = service.name().to_string();
        self.inner.registry.insert(name, Arc::new(service));
    }

    /// Registered service names.
    pub fn service_names(&self) -> Vec<String> {
        self.inner.registry.iter().map(|e| e.key().clone()).collect()
    }

    /// Binds `bind_addr` and starts accepting connections on a background
    /// task. Idempotent.
    pub async fn start(&self, bind_addr: &PeerAddr) -> Result<()> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let listener = TcpListener::bind((bind_addr.host(), bind_addr.port())).await?;
        let local = listener.local_addr()?;
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(local);
        info!(addr = %local, "rpc server listening");

        let inner = self.inner.clone();
        tokio::spawn(accept_loop(inner, listener));
        Ok(())
    }

    /// The actual bound address, once started.
    pub fn local_addr(&self) -> Option<PeerAddr> {
        self.inner
            .local_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(PeerAddr::from)
    }

    /// Stops accepting and tears down every connection.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "connection established");
                match Node::accepted(stream, inner.config.clone()) {
                    Ok(node) => {
                        let inner = inner.clone();
                        tokio::spawn(connection_loop(inner, Arc::new(node)));
                    }
                    Err(e) => warn!(%peer, error = %e, "failed to set up connection"),
                }
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

/// Reads requests off one connection and spawns a dispatch task per
/// request, so a slow call cannot hold up the connection's other traffic.
async fn connection_loop(inner: Arc<ServerInner>, node: Arc<Node>) {
    let peer = node.addr().clone();
    loop {
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = node.recv_frame() => res,
        };
        match result {
            Ok(Some((KIND_RPC_REQUEST, payload))) => {
                let request = match JsonCodec::decode_request(&payload) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(%peer, error = %e, "failed to decode request");
                        write_response(&node, &RpcResponse::error(0, e.to_string())).await;
                        continue;
                    }
                };
                let inner = inner.clone();
                let node = node.clone();
                tokio::spawn(async move {
                    let response = match dispatch(&inner, &request).await {
                        Ok(value) => RpcResponse::success(request.id, value),
                        // A Remote error already is the underlying failure
                        // description; ship it without re-wrapping.
                        Err(MeshError::Remote(message)) => {
                            RpcResponse::error(request.id, message)
                        }
                        Err(e) => RpcResponse::error(request.id, e.to_string()),
                    };
                    write_response(&node, &response).await;
                });
            }
            Ok(Some((kind, _))) => {
                debug!(%peer, kind, "ignoring frame of unexpected kind");
            }
            Ok(None) => {
                debug!(%peer, "connection closed by peer");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "connection failed");
                break;
            }
        }
    }
    node.disconnect(false).await;
}

async fn dispatch(inner: &Arc<ServerInner>, request: &RpcRequest) -> Result<Value> {
    let service = inner
        .registry
        .get(&request.service)
        .map(|e| e.value().clone())
        .ok_or_else(|| MeshError::ServiceNotFound(request.service.clone()))?;
    service.dispatch(request).await
}

async fn write_response(node: &Arc<Node>, response: &RpcResponse) {
    let payload = match JsonCodec::encode_response(response) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "failed to encode response");
            return;
        }
    };
    if let Err(e) = node.send_frame(KIND_RPC_RESPONSE, &payload).await {
        warn!(error = %e, "failed to send response");
    }
}
