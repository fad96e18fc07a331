//! Provider capability set
//!
//! Every backend implements `Provider`; callers hold them as
//! `Arc<dyn Provider>` in a scheme-keyed `ProviderRegistry`.

use async_trait::async_trait;
use serde_json::Value;
use crate::uri::ResourceUri;
use crate::watch::{WatchCallback, WatchHandle};
use crate::{Error, Result};

/// Per-item results aligned index-for-index with a batch's input.
pub type BatchResult<T> = Vec<Result<T>>;

/// `execute` action that lists the values under a URI's parent prefix
pub const LIST_ACTION: &str = "list";

/// One storage backend.
///
/// Values are opaque bytes. `set` stores its own copy of the input and
/// `get` hands out a fresh copy, so no caller ever aliases stored data.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Read the value stored under `uri`
    async fn get(&self, uri: &ResourceUri) -> Result<Vec<u8>>;

    /// Store a value under `uri` (last write wins)
    async fn set(&self, uri: &ResourceUri, value: &[u8]) -> Result<()>;

    /// Remove the value under `uri`; `NotFound` if absent
    async fn delete(&self, uri: &ResourceUri) -> Result<()>;

    /// Whether a value is stored under `uri`
    async fn exists(&self, uri: &ResourceUri) -> Result<bool>;

    /// Backend-specific action routed by the URI's final segment
    async fn execute(&self, uri: &ResourceUri, payload: &[u8]) -> Result<Vec<u8>>;

    /// Watch `uri` for changes.
    ///
    /// Delivers the current value first (if there is one), then every
    /// change; `None` marks a delete. Deliveries are asynchronous.
    async fn sync(&self, uri: &ResourceUri, callback: WatchCallback) -> Result<WatchHandle>;

    async fn batch_get(&self, uris: &[ResourceUri]) -> BatchResult<Vec<u8>>;

    /// Store `values[i]` under `uris[i]`. Unequal lengths fail every index
    /// with `BatchSizeMismatch` and write nothing.
    async fn batch_set(&self, uris: &[ResourceUri], values: &[Vec<u8>]) -> BatchResult<()>;

    async fn batch_delete(&self, uris: &[ResourceUri]) -> BatchResult<()>;

    /// Release watchers and in-process state
    async fn close(&self) -> Result<()>;
}

/// One `BatchSizeMismatch` per key index.
pub(crate) fn size_mismatch<T>(uris: &[ResourceUri], values: &[Vec<u8>]) -> Option<BatchResult<T>> {
    if uris.len() == values.len() {
        return None;
    }
    tracing::debug!("Batch size mismatch: {} keys, {} values", uris.len(), values.len());
    Some(
        uris.iter()
            .map(|_| {
                Err(Error::BatchSizeMismatch {
                    expected: uris.len(),
                    actual: values.len(),
                })
            })
            .collect(),
    )
}

/// Marshal stored values as a JSON array.
///
/// Values that are JSON are embedded as-is; anything else becomes a
/// JSON string.
pub(crate) fn marshal_list<'a>(values: impl IntoIterator<Item = &'a [u8]>) -> Result<Vec<u8>> {
    let items: Vec<Value> = values
        .into_iter()
        .map(|raw| {
            serde_json::from_slice::<Value>(raw)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
        })
        .collect();
    Ok(serde_json::to_vec(&items)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_list_mixes_json_and_text() {
        let values: Vec<&[u8]> = vec![br#"{"a":1}"#, b"plain", b"42"];
        let out = marshal_list(values).unwrap();
        assert_eq!(out, br#"[{"a":1},"plain",42]"#);
    }

    #[test]
    fn test_marshal_empty_list() {
        assert_eq!(marshal_list(Vec::<&[u8]>::new()).unwrap(), b"[]");
    }

    #[test]
    fn test_size_mismatch_fails_every_key() {
        let uris = vec![ResourceUri::parse("memory://t/a"), ResourceUri::parse("memory://t/b")];
        let values = vec![b"only".to_vec()];
        let results: BatchResult<()> = size_mismatch(&uris, &values).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(Error::BatchSizeMismatch { .. }))));

        assert!(size_mismatch::<()>(&uris, &[b"a".to_vec(), b"b".to_vec()]).is_none());
    }
}
