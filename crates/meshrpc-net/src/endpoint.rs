//! The cluster multiplexer.
//!
//! An [`Endpoint`] owns a listening socket plus a set of *desired peers*:
//! addresses it keeps dialing until they are reachable and re-dials when a
//! live connection drops. Accepted and dialed connections go through the
//! same handling path: register the node (or lose the duplicate race),
//! then run one read loop that feeds every received frame into the
//! endpoint's single inbound queue.
//!
//! At most one live connection exists per peer address. When two
//! connections race for the same address, the one already registered wins
//! and the newcomer is disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use meshrpc_common::frame::KIND_RAW;
use meshrpc_common::{MeshError, NetConfig, PeerAddr, Result};

use crate::node::Node;

/// One message received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Observed address of the connection the message arrived on.
    pub from: PeerAddr,
    pub payload: Vec<u8>,
}

/// The cluster multiplexer: a listener, a desired-peer set, and one live
/// connection per peer address, multiplexed onto a single inbound queue.
///
/// # Example
///
/// ```no_run
/// use meshrpc_common::{NetConfig, PeerAddr};
/// use meshrpc_net::Endpoint;
///
/// # async fn run() -> meshrpc_common::Result<()> {
/// let endpoint = Endpoint::new("0.0.0.0:9001".parse()?, NetConfig::default());
/// endpoint.start().await?;
/// endpoint.add_peer("10.0.0.2:9001".parse()?);
///
/// endpoint.broadcast(b"hello cluster").await;
/// while let Some(msg) = endpoint.recv(None).await? {
///     println!("{} sent {} bytes", msg.from, msg.payload.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Endpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    bind_addr: PeerAddr,
    config: NetConfig,
    desired: DashSet<PeerAddr>,
    connections: DashMap<PeerAddr, Arc<Node>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<mpsc::Receiver<Inbound>>,
    cancel: CancellationToken,
    started: AtomicBool,
    local_addr: StdMutex<Option<std::net::SocketAddr>>,
}

impl Endpoint {
    /// Creates a stopped endpoint that will bind `bind_addr` on [`start`].
    ///
    /// [`start`]: Endpoint::start
    pub fn new(bind_addr: PeerAddr, config: NetConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.recv_queue_capacity);
        Self {
            inner: Arc::new(EndpointInner {
                bind_addr,
                config,
                desired: DashSet::new(),
                connections: DashMap::new(),
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                local_addr: StdMutex::new(None),
            }),
        }
    }

    /// Binds the listener and starts accepting inbound connections on a
    /// background task. Idempotent.
    pub async fn start(&self) -> Result<()> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let listener = TcpListener::bind((
            self.inner.bind_addr.host(),
            self.inner.bind_addr.port(),
        ))
        .await?;
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(listener.local_addr()?);

        let inner = self.inner.clone();
        tokio::spawn(accept_loop(inner, listener));
        Ok(())
    }

    /// The actual bound address, once started. Useful with port 0.
    pub fn local_addr(&self) -> Option<PeerAddr> {
        self.inner
            .local_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(PeerAddr::from)
    }

    /// Adds `addr` to the desired-peer set and keeps dialing it in the
    /// background until it is reachable, removed, or the endpoint stops.
    /// Idempotent.
    pub fn add_peer(&self, addr: PeerAddr) {
        if !self.inner.desired.insert(addr.clone()) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let node = Arc::new(Node::new(addr.clone(), inner.config.clone()));
            if connect_while_desired(&inner, &addr, &node).await {
                register_connection(&inner, node).await;
            }
        });
    }

    /// Removes `addr` from the desired-peer set and tears down its live
    /// connection, if any.
    pub async fn remove_peer(&self, addr: &PeerAddr) {
        self.inner.desired.remove(addr);
        if let Some((_, node)) = self.inner.connections.remove(addr) {
            node.disconnect(false).await;
        }
    }

    /// Currently desired peers.
    pub fn peers(&self) -> Vec<PeerAddr> {
        self.inner.desired.iter().map(|a| a.key().clone()).collect()
    }

    /// Whether a live connection to `addr` exists right now.
    pub fn is_connected(&self, addr: &PeerAddr) -> bool {
        self.inner
            .connections
            .get(addr)
            .map(|n| n.is_connected())
            .unwrap_or(false)
    }

    /// Sends `payload` to `addr`, best-effort.
    ///
    /// Without a live connection the send is silently dropped: nothing is
    /// queued and no error is reported. Delivery is at most once.
    pub async fn send(&self, addr: &PeerAddr, payload: &[u8]) {
        let node = self.inner.connections.get(addr).map(|n| n.value().clone());
        if let Some(node) = node {
            if let Err(e) = node.send_frame(KIND_RAW, payload).await {
                debug!(peer = %addr, error = %e, "send dropped");
            }
        } else {
            debug!(peer = %addr, "send dropped: no live connection");
        }
    }

    /// Sends `payload` to every address currently in the desired-peer set,
    /// each with [`send`](Endpoint::send) semantics.
    pub async fn broadcast(&self, payload: &[u8]) {
        let peers: Vec<PeerAddr> = self.inner.desired.iter().map(|a| a.key().clone()).collect();
        for addr in peers {
            self.send(&addr, payload).await;
        }
    }

    /// Waits for the next inbound message.
    ///
    /// With a timeout, returns `Ok(None)` when it elapses with no message.
    /// Without one, blocks until a message arrives.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] once the endpoint has stopped.
    pub async fn recv(&self, timeout: Option<Duration>) -> Result<Option<Inbound>> {
        let mut rx = self.inner.inbound_rx.lock().await;
        match timeout {
            Some(d) => tokio::select! {
                _ = self.inner.cancel.cancelled() => Err(MeshError::Closed),
                res = tokio::time::timeout(d, rx.recv()) => match res {
                    Ok(Some(msg)) => Ok(Some(msg)),
                    Ok(None) => Err(MeshError::Closed),
                    Err(_) => Ok(None),
                },
            },
            None => tokio::select! {
                _ = self.inner.cancel.cancelled() => Err(MeshError::Closed),
                msg = rx.recv() => msg.map(Some).ok_or(MeshError::Closed),
            },
        }
    }

    /// Stops the endpoint: no further connect or accept activity, all
    /// owned connections closed. A stopped endpoint stays stopped.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let nodes: Vec<Arc<Node>> = self
            .inner
            .connections
            .iter()
            .map(|e| e.value().clone())
            .collect();
        self.inner.connections.clear();
        for node in nodes {
            node.disconnect(false).await;
        }
    }
}

async fn accept_loop(inner: Arc<EndpointInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = listener.accept() => res,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted inbound connection");
                match Node::accepted(stream, inner.config.clone()) {
                    Ok(node) => register_connection(&inner, Arc::new(node)).await,
                    Err(e) => warn!(%peer, error = %e, "failed to set up inbound connection"),
                }
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Shared handling for accepted and dialed connections: register the node
/// under its peer address, or drop it if that address already has a live
/// connection (the registered connection wins the race), then run the
/// read loop.
async fn register_connection(inner: &Arc<EndpointInner>, node: Arc<Node>) {
    let addr = node.addr().clone();
    let registered = match inner.connections.entry(addr.clone()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(node.clone());
            true
        }
    };
    if registered {
        let inner = inner.clone();
        tokio::spawn(read_loop(inner, addr, node));
    } else {
        debug!(peer = %addr, "duplicate connection dropped");
        node.disconnect(false).await;
    }
}

/// One read loop per live connection: frame in, enqueue, repeat. On a read
/// failure the connection is re-dialed in place while the peer is still
/// desired; otherwise it is removed and the loop ends.
async fn read_loop(inner: Arc<EndpointInner>, addr: PeerAddr, node: Arc<Node>) {
    loop {
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            res = node.recv_frame() => res,
        };
        match result {
            Ok(Some((_kind, payload))) => {
                let msg = Inbound {
                    from: addr.clone(),
                    payload,
                };
                let delivered = tokio::select! {
                    _ = inner.cancel.cancelled() => false,
                    res = inner.inbound_tx.send(msg) => res.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            Ok(None) => {
                debug!(peer = %addr, "peer closed connection");
                if !recover(&inner, &addr, &node).await {
                    break;
                }
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "read failed");
                if !recover(&inner, &addr, &node).await {
                    break;
                }
            }
        }
    }
}

/// Reconnects a lost connection in place while its address stays desired.
/// Returns false when the loop should end: the peer was deliberately
/// dropped, the endpoint stopped, or another connection took the slot.
async fn recover(inner: &Arc<EndpointInner>, addr: &PeerAddr, node: &Arc<Node>) -> bool {
    node.disconnect(false).await;
    if inner.cancel.is_cancelled() || !inner.desired.contains(addr) {
        inner.connections.remove(addr);
        return false;
    }
    warn!(peer = %addr, "connection lost, reconnecting");
    if !connect_while_desired(inner, addr, node).await {
        inner.connections.remove(addr);
        return false;
    }
    // Re-assert map membership: a concurrent connection may have taken the
    // slot while this one was re-dialing.
    let kept = match inner.connections.entry(addr.clone()) {
        Entry::Occupied(slot) => Arc::ptr_eq(slot.get(), node),
        Entry::Vacant(slot) => {
            slot.insert(node.clone());
            true
        }
    };
    if !kept {
        debug!(peer = %addr, "another connection took over during reconnect");
        node.disconnect(false).await;
    }
    kept
}

/// Dials until connected, the address leaves the desired set, or the
/// endpoint stops. Returns true once the node is connected and still
/// wanted.
async fn connect_while_desired(
    inner: &Arc<EndpointInner>,
    addr: &PeerAddr,
    node: &Arc<Node>,
) -> bool {
    loop {
        if inner.cancel.is_cancelled() || !inner.desired.contains(addr) {
            return false;
        }
        let result = tokio::select! {
            _ = inner.cancel.cancelled() => return false,
            res = node.connect(Some(inner.config.connect_timeout)) => res,
        };
        match result {
            Ok(()) => {
                if inner.cancel.is_cancelled() || !inner.desired.contains(addr) {
                    node.disconnect(false).await;
                    return false;
                }
                return true;
            }
            Err(e) => {
                debug!(peer = %addr, error = %e, "dial failed, will retry");
            }
        }
        tokio::select! {
            _ = inner.cancel.cancelled() => return false,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }
}
