//! Single-assignment futures for call correlation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use meshrpc_common::{MeshError, Result};

/// A single-assignment future.
///
/// [`set`](RpcFuture::set) is callable exactly once; later calls are
/// no-ops. [`get`](RpcFuture::get) waits until the value is set, and a
/// `set` that happens before any `get` still delivers the value to a later
/// `get`. All clones share the same cell, so the completing task and the
/// waiting task each hold their own handle.
pub struct RpcFuture<T> {
    inner: Arc<FutureInner<T>>,
}

struct FutureInner<T> {
    cell: Mutex<Option<T>>,
    assigned: AtomicBool,
    notify: Notify,
}

impl<T> Clone for RpcFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for RpcFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RpcFuture<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                cell: Mutex::new(None),
                assigned: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Assigns the value and wakes every waiter. Only the first call has
    /// any effect.
    pub fn set(&self, value: T) {
        if self.inner.assigned.swap(true, Ordering::SeqCst) {
            return;
        }
        *self
            .inner
            .cell
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(value);
        self.inner.notify.notify_waiters();
    }
}

impl<T: Clone> RpcFuture<T> {
    /// Returns the value if it has been set.
    pub fn try_get(&self) -> Option<T> {
        self.inner
            .cell
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Waits until the value is set.
    pub async fn get(&self) -> T {
        loop {
            // Register interest before re-checking the cell, otherwise a
            // set landing between the check and the await is lost.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.try_get() {
                return value;
            }
            notified.await;
        }
    }

    /// Waits up to `timeout` for the value.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Timeout`] when the deadline passes with the
    /// future still unset.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| MeshError::Timeout(timeout.as_millis() as u64))
    }
}
