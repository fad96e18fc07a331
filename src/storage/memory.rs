//! In-memory provider
//!
//! One `RwLock` guards both the value map and the watcher map. Writes
//! compute their notifications under the lock and dispatch them after it
//! is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use crate::provider::{marshal_list, size_mismatch, BatchResult, Provider, LIST_ACTION};
use crate::uri::ResourceUri;
use crate::watch::{dispatch, WatchCallback, WatchHandle, WatchToken};
use crate::{Error, Result};

struct Registration {
    callback: WatchCallback,
    token: WatchToken,
    /// Runtime that was current at `sync`; writes may come from anywhere
    runtime: Handle,
}

/// Notification computed under the lock, delivered after it.
struct Pending {
    callback: WatchCallback,
    token: WatchToken,
    runtime: Handle,
    payload: Option<Vec<u8>>,
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, Vec<u8>>,
    watchers: HashMap<String, HashMap<u64, Registration>>,
}

impl MemoryState {
    fn pending_for(&self, key: &str, payload: Option<&[u8]>) -> Vec<Pending> {
        let Some(watchers) = self.watchers.get(key) else {
            return Vec::new();
        };
        watchers
            .values()
            .map(|reg| Pending {
                callback: Arc::clone(&reg.callback),
                token: reg.token.clone(),
                runtime: reg.runtime.clone(),
                payload: payload.map(<[u8]>::to_vec),
            })
            .collect()
    }

    fn insert(&mut self, key: String, value: &[u8]) -> Vec<Pending> {
        let pending = self.pending_for(&key, Some(value));
        self.values.insert(key, value.to_vec());
        pending
    }

    fn remove(&mut self, key: &str) -> Option<Vec<Pending>> {
        self.values.remove(key)?;
        Some(self.pending_for(key, None))
    }
}

#[derive(Default)]
struct Inner {
    state: RwLock<MemoryState>,
    next_watch_id: AtomicU64,
}

/// Non-persistent provider keyed by canonical URI string.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

impl MemoryProvider {
    /// Create a new empty in-memory provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.inner.state.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live watcher registrations across all keys
    pub fn watcher_count(&self) -> usize {
        self.inner.state.read().watchers.values().map(HashMap::len).sum()
    }

    fn deliver(pending: Vec<Pending>) {
        for p in pending {
            dispatch(&p.runtime, p.callback, p.token, p.payload);
        }
    }

    fn list(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        let prefix = uri.parent_prefix();
        let state = self.inner.state.read();
        let mut matches: Vec<(&String, &Vec<u8>)> = state
            .values
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));
        marshal_list(matches.into_iter().map(|(_, v)| v.as_slice()))
    }
}

fn deregister(inner: &Weak<Inner>, key: &str, id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut state = inner.state.write();
    if let Some(watchers) = state.watchers.get_mut(key) {
        watchers.remove(&id);
        if watchers.is_empty() {
            state.watchers.remove(key);
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn get(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        tracing::debug!("memory get {}", uri);
        self.inner
            .state
            .read()
            .values
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| Error::NotFound(uri.to_uri_string()))
    }

    async fn set(&self, uri: &ResourceUri, value: &[u8]) -> Result<()> {
        tracing::debug!("memory set {} ({} bytes)", uri, value.len());
        let pending = self.inner.state.write().insert(uri.to_uri_string(), value);
        Self::deliver(pending);
        Ok(())
    }

    async fn delete(&self, uri: &ResourceUri) -> Result<()> {
        tracing::debug!("memory delete {}", uri);
        let pending = self
            .inner
            .state
            .write()
            .remove(uri.as_str())
            .ok_or_else(|| Error::NotFound(uri.to_uri_string()))?;
        Self::deliver(pending);
        Ok(())
    }

    async fn exists(&self, uri: &ResourceUri) -> Result<bool> {
        Ok(self.inner.state.read().values.contains_key(uri.as_str()))
    }

    async fn execute(&self, uri: &ResourceUri, _payload: &[u8]) -> Result<Vec<u8>> {
        tracing::debug!("memory execute {}", uri);
        match uri.last_segment() {
            Some(LIST_ACTION) => self.list(uri),
            other => Err(Error::NotSupported(format!(
                "memory action {:?}",
                other.unwrap_or_default()
            ))),
        }
    }

    async fn sync(&self, uri: &ResourceUri, callback: WatchCallback) -> Result<WatchHandle> {
        let runtime = Handle::try_current()?;
        let key = uri.to_uri_string();
        let id = self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let token = WatchToken::new();

        let replay = {
            let mut state = self.inner.state.write();
            state.watchers.entry(key.clone()).or_default().insert(
                id,
                Registration {
                    callback: Arc::clone(&callback),
                    token: token.clone(),
                    runtime: runtime.clone(),
                },
            );
            state.values.get(&key).cloned()
        };
        tracing::debug!("memory sync {} (watcher {})", uri, id);

        if let Some(current) = replay {
            dispatch(&runtime, callback, token.clone(), Some(current));
        }

        let weak = Arc::downgrade(&self.inner);
        Ok(WatchHandle::new(token, move || deregister(&weak, &key, id)))
    }

    async fn batch_get(&self, uris: &[ResourceUri]) -> BatchResult<Vec<u8>> {
        let state = self.inner.state.read();
        uris.iter()
            .map(|uri| {
                state
                    .values
                    .get(uri.as_str())
                    .cloned()
                    .ok_or_else(|| Error::NotFound(uri.to_uri_string()))
            })
            .collect()
    }

    async fn batch_set(&self, uris: &[ResourceUri], values: &[Vec<u8>]) -> BatchResult<()> {
        if let Some(mismatch) = size_mismatch(uris, values) {
            return mismatch;
        }

        let mut pending = Vec::new();
        let results: BatchResult<()> = {
            let mut state = self.inner.state.write();
            uris.iter()
                .zip(values)
                .map(|(uri, value)| {
                    pending.extend(state.insert(uri.to_uri_string(), value));
                    Ok(())
                })
                .collect()
        };
        Self::deliver(pending);
        results
    }

    async fn batch_delete(&self, uris: &[ResourceUri]) -> BatchResult<()> {
        let mut pending = Vec::new();
        let results: BatchResult<()> = {
            let mut state = self.inner.state.write();
            uris.iter()
                .map(|uri| match state.remove(uri.as_str()) {
                    Some(p) => {
                        pending.extend(p);
                        Ok(())
                    }
                    None => Err(Error::NotFound(uri.to_uri_string())),
                })
                .collect()
        };
        Self::deliver(pending);
        results
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        for reg in state.watchers.values().flat_map(HashMap::values) {
            reg.token.cancel();
        }
        let dropped = state.values.len();
        *state = MemoryState::default();
        tracing::info!("memory provider closed ({} values dropped)", dropped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    type Delivery = Option<Vec<u8>>;

    fn uri(s: &str) -> ResourceUri {
        ResourceUri::parse(s)
    }

    fn channel_callback() -> (WatchCallback, UnboundedReceiver<Delivery>) {
        let (tx, rx) = unbounded_channel();
        let callback: WatchCallback = Arc::new(move |payload| {
            let _ = tx.send(payload);
        });
        (callback, rx)
    }

    async fn next(rx: &mut UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for watcher delivery")
            .expect("watcher channel closed")
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/a");
        for payload in [&b""[..], b"x", b"\x00\xffbinary"] {
            store.set(&u, payload).await.unwrap();
            assert_eq!(store.get(&u).await.unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn test_tombstone() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/a");
        store.set(&u, b"v").await.unwrap();
        store.delete(&u).await.unwrap();

        assert!(store.get(&u).await.unwrap_err().is_not_found());
        assert!(!store.exists(&u).await.unwrap());
        assert!(store.delete(&u).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_no_aliasing() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/a");

        let mut input = b"original".to_vec();
        store.set(&u, &input).await.unwrap();
        input[0] = b'X';
        assert_eq!(store.get(&u).await.unwrap(), b"original");

        let mut out = store.get(&u).await.unwrap();
        out[0] = b'Y';
        assert_eq!(store.get(&u).await.unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_replay_on_subscribe() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/a");
        store.set(&u, b"v1").await.unwrap();

        let (cb, mut rx) = channel_callback();
        let _handle = store.sync(&u, cb).await.unwrap();
        assert_eq!(next(&mut rx).await, Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn test_no_replay_when_absent() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/missing");

        let (cb, mut rx) = channel_callback();
        let _handle = store.sync(&u, cb).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(waited.is_err(), "no replay expected for an absent key");

        store.set(&u, b"now").await.unwrap();
        assert_eq!(next(&mut rx).await, Some(b"now".to_vec()));
    }

    #[tokio::test]
    async fn test_watch_scenario() {
        let store = MemoryProvider::new();
        let u = uri("memory://test/data/watch.txt");
        store.set(&u, b"initial").await.unwrap();

        let (cb, mut rx) = channel_callback();
        let handle = store.sync(&u, cb).await.unwrap();
        assert_eq!(next(&mut rx).await, Some(b"initial".to_vec()));

        store.set(&u, b"modified").await.unwrap();
        assert_eq!(next(&mut rx).await, Some(b"modified".to_vec()));

        store.delete(&u).await.unwrap();
        assert_eq!(next(&mut rx).await, None);

        handle.stop();
    }

    #[tokio::test]
    async fn test_stop_prevents_future_deliveries() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/a");

        let (cb, mut rx) = channel_callback();
        let handle = store.sync(&u, cb).await.unwrap();
        assert_eq!(store.watcher_count(), 1);

        handle.stop();
        handle.stop();
        assert_eq!(store.watcher_count(), 0);

        store.set(&u, b"after-stop").await.unwrap();
        // Registration (and its sender) is gone, so the channel closes
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_blocking_watcher_does_not_stall_writer() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/slow");

        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);
        let slow: WatchCallback = Arc::new(move |_| {
            let _ = release_rx.lock().recv_timeout(Duration::from_secs(5));
        });
        let (fast, mut fast_rx) = channel_callback();

        let _slow = store.sync(&u, slow).await.unwrap();
        let _fast = store.sync(&u, fast).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), store.set(&u, b"v"))
            .await
            .expect("writer blocked by watcher")
            .unwrap();
        assert_eq!(next(&mut fast_rx).await, Some(b"v".to_vec()));
        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn test_batch_delete_partial_failure() {
        let store = MemoryProvider::new();
        let k1 = uri("memory://t/k1");
        store.set(&k1, b"v").await.unwrap();

        let results = store
            .batch_delete(&[k1.clone(), uri("memory://t/k2"), uri("memory://t/k3")])
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_not_found());
        assert!(results[2].as_ref().unwrap_err().is_not_found());
        assert!(!store.exists(&k1).await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_set_size_mismatch_writes_nothing() {
        let store = MemoryProvider::new();
        let uris = [uri("memory://t/u1"), uri("memory://t/u2")];

        let results = store.batch_set(&uris, &[b"only".to_vec()]).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(Error::BatchSizeMismatch { .. }))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_batch_set_and_get() {
        let store = MemoryProvider::new();
        let uris = [uri("memory://t/a"), uri("memory://t/b")];

        let results = store.batch_set(&uris, &[b"1".to_vec(), b"2".to_vec()]).await;
        assert!(results.iter().all(Result::is_ok));

        let got = store
            .batch_get(&[uris[0].clone(), uri("memory://t/missing"), uris[1].clone()])
            .await;
        assert_eq!(got[0].as_ref().unwrap(), b"1");
        assert!(got[1].as_ref().unwrap_err().is_not_found());
        assert_eq!(got[2].as_ref().unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_empty_batches() {
        let store = MemoryProvider::new();
        assert!(store.batch_get(&[]).await.is_empty());
        assert!(store.batch_set(&[], &[]).await.is_empty());
        assert!(store.batch_delete(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_set_notifies_watchers() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/watched");
        let (cb, mut rx) = channel_callback();
        let _handle = store.sync(&u, cb).await.unwrap();

        store.batch_set(&[u.clone()], &[b"batched".to_vec()]).await;
        assert_eq!(next(&mut rx).await, Some(b"batched".to_vec()));
    }

    #[tokio::test]
    async fn test_execute_list() {
        let store = MemoryProvider::new();
        store.set(&uri("memory://t/data/b"), br#"{"n":2}"#).await.unwrap();
        store.set(&uri("memory://t/data/a"), br#"{"n":1}"#).await.unwrap();
        store.set(&uri("memory://t/other/c"), br#"{"n":3}"#).await.unwrap();

        let out = store.execute(&uri("memory://t/data/list"), b"").await.unwrap();
        let listed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(listed, serde_json::json!([{"n": 1}, {"n": 2}]));
    }

    #[tokio::test]
    async fn test_execute_unknown_action() {
        let store = MemoryProvider::new();
        let err = store.execute(&uri("memory://t/data/compact"), b"").await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_close_resets_state() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/a");
        store.set(&u, b"v").await.unwrap();
        let (cb, _rx) = channel_callback();
        let handle = store.sync(&u, cb).await.unwrap();

        store.close().await.unwrap();
        assert!(handle.is_stopped());
        assert!(store.is_empty());
        assert_eq!(store.watcher_count(), 0);

        // Behaves as a fresh store afterwards
        assert!(!store.exists(&u).await.unwrap());
        store.set(&u, b"again").await.unwrap();
        assert_eq!(store.get(&u).await.unwrap(), b"again");
        handle.stop();
    }

    #[test]
    fn test_sync_outside_runtime_is_an_error() {
        let store = MemoryProvider::new();
        let u = uri("memory://t/k");
        store.inner.state.write().values.insert(u.to_uri_string(), b"v".to_vec());
        let (cb, _rx) = channel_callback();

        let mut sync = store.sync(&u, cb);
        let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
        let outcome = sync.as_mut().poll(&mut cx);
        assert!(matches!(outcome, std::task::Poll::Ready(Err(Error::Runtime(_)))));
        assert_eq!(store.watcher_count(), 0);
    }

    #[test]
    fn test_write_from_plain_thread_delivers_on_watch_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let store = MemoryProvider::new();
        let u = uri("memory://t/k");
        let (cb, mut rx) = channel_callback();
        let _handle = runtime.block_on(store.sync(&u, cb)).unwrap();

        // No runtime on this thread; a memory write finishes on its first poll
        {
            let mut set = store.set(&u, b"v");
            let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
            assert!(matches!(set.as_mut().poll(&mut cx), std::task::Poll::Ready(Ok(()))));
        }

        assert_eq!(runtime.block_on(next(&mut rx)), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
