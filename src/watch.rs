//! Watch primitives shared by every provider's `sync`
//!
//! A callback never runs on the writer's thread or under a provider lock:
//! `dispatch` hands each delivery to Tokio's blocking pool as its own task.
//! Each registration carries a `WatchToken`; a task checks the token right
//! before invoking the callback, so `stop()` prevents any delivery that has
//! not started yet. A delivery already running cannot be recalled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use tokio::runtime::Handle;

/// Change callback. `Some(bytes)` is the new value, `None` means deleted.
pub type WatchCallback = Arc<dyn Fn(Option<Vec<u8>>) + Send + Sync>;

/// Per-watcher cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct WatchToken(Arc<AtomicBool>);

impl WatchToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token. Returns true only for the call that cancelled it.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle returned by `Provider::sync`.
///
/// `stop()` deregisters the watcher; calling it again is a no-op.
/// Dropping the handle does not stop the watcher.
pub struct WatchHandle {
    token: WatchToken,
    on_stop: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl WatchHandle {
    pub(crate) fn new(token: WatchToken, on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            token,
            on_stop: Mutex::new(Some(Box::new(on_stop))),
        }
    }

    /// Stop future deliveries and release the registration
    pub fn stop(&self) {
        self.token.cancel();
        let on_stop = self.on_stop.lock().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    /// Whether this watcher has been stopped (directly or by provider close)
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Schedule one delivery as an independent task on the blocking pool.
pub(crate) fn dispatch(
    runtime: &Handle,
    callback: WatchCallback,
    token: WatchToken,
    payload: Option<Vec<u8>>,
) {
    runtime.spawn_blocking(move || {
        if token.is_cancelled() {
            return;
        }
        callback(payload);
    });
}
