//! A single peer connection.
//!
//! A [`Node`] owns one physical TCP socket to one peer address. Nothing
//! else touches the socket while the node holds it. Reads are serialized
//! under a read lock and writes under a separate write lock, so a
//! full-duplex protocol can pipeline both directions on the same
//! connection without one serializing against the other.
//!
//! Lifecycle: `unconnected → connecting → connected → disconnected`, and
//! back to `connecting` if the owner dials again. The initiating side
//! knows the peer address up front ([`Node::new`]); the accepting side is
//! built from an already-connected inbound socket ([`Node::accepted`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use meshrpc_common::frame;
use meshrpc_common::{MeshError, NetConfig, PeerAddr, Result};

/// One physical duplex connection to a peer.
pub struct Node {
    addr: PeerAddr,
    config: NetConfig,
    connected: AtomicBool,
    /// Collapses concurrent connect attempts into one.
    dialing: Mutex<()>,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Cancelled on disconnect so I/O blocked on the socket unblocks and
    /// releases its lock. Replaced with a fresh token on every connect.
    closed: StdMutex<CancellationToken>,
}

impl Node {
    /// Creates an unconnected node that will dial `addr` on [`connect`].
    ///
    /// [`connect`]: Node::connect
    pub fn new(addr: PeerAddr, config: NetConfig) -> Self {
        let closed = CancellationToken::new();
        closed.cancel();
        Self {
            addr,
            config,
            connected: AtomicBool::new(false),
            dialing: Mutex::new(()),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closed: StdMutex::new(closed),
        }
    }

    /// Wraps an already-connected inbound socket.
    ///
    /// The peer address is derived from the socket's observed remote
    /// address. The same socket tuning as on the dialing side is applied.
    pub fn accepted(stream: TcpStream, config: NetConfig) -> Result<Self> {
        let addr = PeerAddr::from(stream.peer_addr()?);
        tune_socket(&stream, &config)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            addr,
            config,
            connected: AtomicBool::new(true),
            dialing: Mutex::new(()),
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            closed: StdMutex::new(CancellationToken::new()),
        })
    }

    /// The peer address this node talks to.
    pub fn addr(&self) -> &PeerAddr {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Dials the peer until connected.
    ///
    /// Already connected is a no-op; concurrent callers collapse into a
    /// single attempt. Each dial attempt is bounded by the configured
    /// connect timeout, with the configured reconnect delay between
    /// attempts. With `overall_timeout` set, the whole loop is bounded by
    /// that deadline; without it, the loop retries until it succeeds.
    ///
    /// On success the socket is tuned: `TCP_NODELAY`, keep-alive enabled
    /// with the configured idle time, probe interval, and probe count.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Connect`] when the overall deadline passes
    /// without a successful attempt.
    pub async fn connect(&self, overall_timeout: Option<Duration>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let _guard = self.dialing.lock().await;
        if self.is_connected() {
            // Another caller finished the dial while we waited.
            return Ok(());
        }

        let deadline = overall_timeout.map(|d| Instant::now() + d);
        let mut last_err: Option<String> = None;
        loop {
            let attempt = TcpStream::connect((self.addr.host(), self.addr.port()));
            match tokio::time::timeout(self.config.connect_timeout, attempt).await {
                Ok(Ok(stream)) => {
                    tune_socket(&stream, &self.config)?;
                    self.install(stream).await;
                    debug!(peer = %self.addr, "connected");
                    return Ok(());
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some("dial attempt timed out".to_string()),
            }

            if let Some(deadline) = deadline {
                if Instant::now() + self.config.reconnect_delay >= deadline {
                    return Err(MeshError::Connect(format!(
                        "failed to connect to {}: {}",
                        self.addr,
                        last_err.unwrap_or_else(|| "unknown error".to_string())
                    )));
                }
            }
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Tears the connection down.
    ///
    /// Idempotent: the `connected` flag is compare-and-swapped so exactly
    /// one of any number of concurrent callers performs the close. With
    /// `force` the socket is closed abortively (`SO_LINGER` zero, so the
    /// peer sees a reset instead of a clean EOF); used when the caller
    /// already knows the peer is gone and a half-closed socket would just
    /// linger.
    pub async fn disconnect(&self, force: bool) {
        if self
            .connected
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        // Wake any read or write blocked on the socket so the halves can
        // be reclaimed below.
        self.current_token().cancel();

        let read_half = self.reader.lock().await.take();
        let write_half = self.writer.lock().await.take();
        if force {
            if let (Some(r), Some(w)) = (read_half, write_half) {
                if let Ok(stream) = r.reunite(w) {
                    let _ = SockRef::from(&stream).set_linger(Some(Duration::from_secs(0)));
                }
            }
        }
        debug!(peer = %self.addr, force, "disconnected");
    }

    /// Reads exactly `n` bytes, serialized under the read lock.
    ///
    /// # Errors
    ///
    /// [`MeshError::NotConnected`] if the node is disconnected,
    /// [`MeshError::Framing`] if the stream ends before `n` bytes arrive.
    pub async fn read_exact(&self, n: usize) -> Result<Vec<u8>> {
        let token = self.io_token()?;
        tokio::select! {
            _ = token.cancelled() => Err(MeshError::NotConnected),
            res = self.read_exact_inner(n) => res,
        }
    }

    async fn read_exact_inner(&self, n: usize) -> Result<Vec<u8>> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(MeshError::NotConnected)?;
        let mut buf = vec![0u8; n];
        reader.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                MeshError::Framing(format!("stream ended before {n} bytes"))
            } else {
                MeshError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Reads at most `n` bytes, serialized under the read lock. Returns an
    /// empty buffer on end of stream.
    pub async fn read_max(&self, n: usize) -> Result<Vec<u8>> {
        let token = self.io_token()?;
        tokio::select! {
            _ = token.cancelled() => Err(MeshError::NotConnected),
            res = self.read_max_inner(n) => res,
        }
    }

    async fn read_max_inner(&self, n: usize) -> Result<Vec<u8>> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(MeshError::NotConnected)?;
        let mut buf = vec![0u8; n];
        let read = reader.read(&mut buf).await?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Writes all chunks then flushes, serialized under the write lock so
    /// two logical messages never interleave byte-for-byte.
    pub async fn write(&self, chunks: &[&[u8]]) -> Result<()> {
        let token = self.io_token()?;
        tokio::select! {
            _ = token.cancelled() => Err(MeshError::NotConnected),
            res = self.write_inner(chunks) => res,
        }
    }

    async fn write_inner(&self, chunks: &[&[u8]]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(MeshError::NotConnected)?;
        for chunk in chunks {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Sends one frame, serialized under the write lock.
    pub async fn send_frame(&self, kind: u32, payload: &[u8]) -> Result<()> {
        let encoded = frame::encode_frame(kind, payload);
        self.write(&[&encoded]).await
    }

    /// Receives one frame, serialized under the read lock.
    ///
    /// Returns `Ok(None)` when the peer shut the stream down cleanly.
    pub async fn recv_frame(&self) -> Result<Option<(u32, Vec<u8>)>> {
        let token = self.io_token()?;
        tokio::select! {
            _ = token.cancelled() => Err(MeshError::NotConnected),
            res = self.recv_frame_inner() => res,
        }
    }

    async fn recv_frame_inner(&self) -> Result<Option<(u32, Vec<u8>)>> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(MeshError::NotConnected)?;
        frame::read_frame(reader).await
    }

    /// Only runs while the dial guard is held and the node is disconnected,
    /// so the half slots are empty and lock holders release immediately.
    async fn install(&self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        *self.current_token_slot() = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
    }

    fn io_token(&self) -> Result<CancellationToken> {
        if !self.is_connected() {
            return Err(MeshError::NotConnected);
        }
        Ok(self.current_token())
    }

    fn current_token(&self) -> CancellationToken {
        self.closed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn current_token_slot(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Disables Nagle and enables keep-alive with the configured idle time,
/// probe interval, and probe count. Platforms without a probe-count knob
/// (Windows, OpenBSD) get idle time and interval only.
fn tune_socket(stream: &TcpStream, config: &NetConfig) -> Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new()
        .with_time(config.keepalive_idle)
        .with_interval(config.keepalive_interval);
    #[cfg(not(any(windows, target_os = "openbsd")))]
    let keepalive = keepalive.with_retries(config.keepalive_retries);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}
