//! Filesystem provider
//!
//! `scheme://namespace/a/b` maps to `<base>/namespace/a/b`; the file's
//! bytes are the value. `sync` is driven by OS file notifications
//! (`notify`) on the file's parent directory.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use walkdir::WalkDir;
use crate::provider::{marshal_list, size_mismatch, BatchResult, Provider, LIST_ACTION};
use crate::uri::ResourceUri;
use crate::watch::{dispatch, WatchCallback, WatchHandle, WatchToken};
use crate::{Error, Result};

/// Prefix of the sibling temp file used for atomic replace
const TEMP_PREFIX: &str = ".uristore-";

struct ActiveWatch {
    _watcher: RecommendedWatcher,
    token: WatchToken,
}

/// Identity of one write. Every `set` renames a fresh file into place, so
/// the inode changes even when the bytes do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    inode: u64,
}

impl FileStamp {
    fn of(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let inode = std::os::unix::fs::MetadataExt::ino(meta);
        #[cfg(not(unix))]
        let inode = 0;
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            inode,
        }
    }
}

/// What a watch last delivered, so repeated OS events for one write
/// collapse into one callback.
struct WatchState {
    path: PathBuf,
    last: Option<FileStamp>,
}

impl WatchState {
    /// Compare the file against the last delivery; `Some` when it changed.
    fn observe(&mut self) -> Option<Option<Vec<u8>>> {
        let stamp = match std::fs::metadata(&self.path) {
            Ok(meta) => FileStamp::of(&meta),
            Err(e) => return self.read_failed(e),
        };
        if self.last == Some(stamp) {
            return None;
        }
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                self.last = Some(stamp);
                Some(Some(bytes))
            }
            Err(e) => self.read_failed(e),
        }
    }

    fn read_failed(&mut self, e: io::Error) -> Option<Option<Vec<u8>>> {
        if e.kind() == io::ErrorKind::NotFound {
            self.last.take()?;
            return Some(None);
        }
        tracing::warn!("watch read error on {}: {}", self.path.display(), e);
        None
    }
}

/// Provider backed by a directory tree.
pub struct FileProvider {
    base: PathBuf,
    watches: Arc<Mutex<HashMap<u64, ActiveWatch>>>,
    next_watch_id: AtomicU64,
    next_temp_id: AtomicU64,
}

impl FileProvider {
    /// Create a provider rooted at `base_dir` (created if missing)
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)?;
        let base = base_dir.canonicalize()?;
        tracing::debug!("file provider rooted at {}", base.display());
        Ok(Self {
            base,
            watches: Arc::new(Mutex::new(HashMap::new())),
            next_watch_id: AtomicU64::new(0),
            next_temp_id: AtomicU64::new(0),
        })
    }

    /// Root directory
    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    /// Number of live watches
    pub fn watch_count(&self) -> usize {
        self.watches.lock().len()
    }

    /// Filesystem path for a URI
    pub fn path_for(&self, uri: &ResourceUri) -> Result<PathBuf> {
        let mut path = self.base.clone();
        for seg in std::iter::once(uri.namespace()).chain(uri.path().iter().map(String::as_str)) {
            check_segment(uri, seg)?;
            path.push(seg);
        }
        Ok(path)
    }

    /// Sibling temp path, unique per write within this process
    fn temp_path(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let seq = self.next_temp_id.fetch_add(1, Ordering::Relaxed);
        path.with_file_name(format!(
            "{}{}.{}.{}.tmp",
            TEMP_PREFIX,
            name,
            std::process::id(),
            seq
        ))
    }

    async fn write_file(&self, uri: &ResourceUri, value: &[u8]) -> Result<()> {
        let path = self.path_for(uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path(&path);
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_file(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        let path = self.path_for(uri)?;
        tokio::fs::read(&path).await.map_err(|e| not_found_or(e, uri))
    }

    async fn remove_file(&self, uri: &ResourceUri) -> Result<()> {
        let path = self.path_for(uri)?;
        tokio::fs::remove_file(&path).await.map_err(|e| not_found_or(e, uri))
    }

    fn list(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        let mut dir = self.base.clone();
        let parent = uri.path().split_last().map(|(_, p)| p).unwrap_or_default();
        for seg in std::iter::once(uri.namespace()).chain(parent.iter().map(String::as_str)) {
            check_segment(uri, seg)?;
            dir.push(seg);
        }
        if !dir.is_dir() {
            return marshal_list(Vec::<&[u8]>::new());
        }

        let mut values = Vec::new();
        for entry in WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
        {
            match std::fs::read(entry.path()) {
                Ok(bytes) => values.push(bytes),
                Err(e) => tracing::debug!("skipping unreadable {}: {}", entry.path().display(), e),
            }
        }
        marshal_list(values.iter().map(Vec::as_slice))
    }
}

fn check_segment(uri: &ResourceUri, seg: &str) -> Result<()> {
    if seg.is_empty() || seg == "." || seg == ".." || seg.contains(['/', '\\']) {
        return Err(Error::InvalidUri(format!("{} (segment {:?})", uri, seg)));
    }
    Ok(())
}

fn not_found_or(e: io::Error, uri: &ResourceUri) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(uri.to_uri_string())
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl Provider for FileProvider {
    async fn get(&self, uri: &ResourceUri) -> Result<Vec<u8>> {
        tracing::debug!("file get {}", uri);
        self.read_file(uri).await
    }

    async fn set(&self, uri: &ResourceUri, value: &[u8]) -> Result<()> {
        tracing::debug!("file set {} ({} bytes)", uri, value.len());
        self.write_file(uri, value).await
    }

    async fn delete(&self, uri: &ResourceUri) -> Result<()> {
        tracing::debug!("file delete {}", uri);
        self.remove_file(uri).await
    }

    async fn exists(&self, uri: &ResourceUri) -> Result<bool> {
        let path = self.path_for(uri)?;
        Ok(tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn execute(&self, uri: &ResourceUri, _payload: &[u8]) -> Result<Vec<u8>> {
        tracing::debug!("file execute {}", uri);
        match uri.last_segment() {
            Some(LIST_ACTION) => self.list(uri),
            other => Err(Error::NotSupported(format!(
                "file action {:?}",
                other.unwrap_or_default()
            ))),
        }
    }

    /// Watch one file.
    ///
    /// A file that does not exist yet gets no initial callback; its first
    /// write is delivered as a change.
    async fn sync(&self, uri: &ResourceUri, callback: WatchCallback) -> Result<WatchHandle> {
        let runtime = Handle::try_current()?;
        let path = self.path_for(uri)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidUri(uri.to_uri_string()))?;
        tokio::fs::create_dir_all(&parent).await?;

        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let token = WatchToken::new();
        let state = Arc::new(Mutex::new(WatchState { path: path.clone(), last: None }));

        let handler = {
            let state = Arc::clone(&state);
            let callback = Arc::clone(&callback);
            let token = token.clone();
            let runtime = runtime.clone();
            move |res: notify::Result<notify::Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("watch error: {:?}", e);
                        return;
                    }
                };
                if matches!(event.kind, EventKind::Access(_)) || token.is_cancelled() {
                    return;
                }
                let mut state = state.lock();
                if !event.paths.iter().any(|p| p == &state.path) {
                    return;
                }
                if let Some(payload) = state.observe() {
                    dispatch(&runtime, Arc::clone(&callback), token.clone(), payload);
                }
            }
        };

        let mut watcher = notify::recommended_watcher(handler)?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        // Replay only after the OS watch is live, so no write slips between.
        {
            let mut state = state.lock();
            if let Some(Some(current)) = state.observe() {
                dispatch(&runtime, Arc::clone(&callback), token.clone(), Some(current));
            }
        }

        self.watches.lock().insert(
            id,
            ActiveWatch {
                _watcher: watcher,
                token: token.clone(),
            },
        );
        tracing::debug!("file sync {} (watch {})", uri, id);

        let watches = Arc::clone(&self.watches);
        Ok(WatchHandle::new(token, move || {
            watches.lock().remove(&id);
        }))
    }

    async fn batch_get(&self, uris: &[ResourceUri]) -> BatchResult<Vec<u8>> {
        let mut results = Vec::with_capacity(uris.len());
        for uri in uris {
            results.push(self.read_file(uri).await);
        }
        results
    }

    async fn batch_set(&self, uris: &[ResourceUri], values: &[Vec<u8>]) -> BatchResult<()> {
        if let Some(mismatch) = size_mismatch(uris, values) {
            return mismatch;
        }
        let mut results = Vec::with_capacity(uris.len());
        for (uri, value) in uris.iter().zip(values) {
            results.push(self.write_file(uri, value).await);
        }
        results
    }

    async fn batch_delete(&self, uris: &[ResourceUri]) -> BatchResult<()> {
        let mut results = Vec::with_capacity(uris.len());
        for uri in uris {
            results.push(self.remove_file(uri).await);
        }
        results
    }

    /// Drop every OS watcher. Files stay on disk.
    async fn close(&self) -> Result<()> {
        let drained: Vec<ActiveWatch> = self.watches.lock().drain().map(|(_, w)| w).collect();
        for watch in &drained {
            watch.token.cancel();
        }
        tracing::info!("file provider closed ({} watches released)", drained.len());
        Ok(())
    }
}
