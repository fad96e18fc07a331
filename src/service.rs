//! Service - typed entry points over the provider registry
//!
//! `Service` is an explicit value: build one at start-up, register
//! providers and type metadata on it, and pass it (or an `Arc` of it)
//! wherever storage is needed.

use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use crate::codec::{self, CodecRegistry};
use crate::config::StoreConfig;
use crate::metadata::{TypeMetadata, TypeRegistry};
use crate::provider::Provider;
use crate::registry::ProviderRegistry;
use crate::storage::{FileProvider, MemoryProvider, SqlConfig, SqliteProvider};
use crate::uri::ResourceUri;
use crate::watch::{WatchCallback, WatchHandle};
use crate::{Error, Result};

pub const MEMORY_SCHEME: &str = "memory";
pub const FILE_SCHEME: &str = "file";
pub const SQL_SCHEME: &str = "sql";

/// Database path that opens an in-memory SQLite database
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Owner of providers, codecs and type metadata.
pub struct Service {
    providers: ProviderRegistry,
    codecs: CodecRegistry,
    types: TypeRegistry,
    default_codecs: RwLock<Vec<String>>,
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

impl Service {
    /// Empty service with the built-in codecs and the `json, text` default chain
    pub fn new() -> Self {
        Self {
            providers: ProviderRegistry::new(),
            codecs: CodecRegistry::with_defaults(),
            types: TypeRegistry::new(),
            default_codecs: RwLock::new(vec![codec::JSON.to_string(), codec::TEXT.to_string()]),
        }
    }

    /// Service with the providers a config asks for
    ///
    /// `memory` is always registered; `file` needs `data_dir` and `sql`
    /// needs `database`.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let service = Self::new();
        service.register_provider(MEMORY_SCHEME, Arc::new(MemoryProvider::new()));

        if let Some(dir) = &config.data_dir {
            service.register_provider(FILE_SCHEME, Arc::new(FileProvider::new(dir)?));
        }

        if let Some(database) = &config.database {
            let conn = if database == IN_MEMORY_DATABASE {
                Connection::open_in_memory()?
            } else {
                let path = Path::new(database);
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            };
            let sql_config = match &config.key_column {
                Some(key_column) => SqlConfig {
                    key_column: key_column.clone(),
                },
                None => SqlConfig::default(),
            };
            service.register_provider(SQL_SCHEME, Arc::new(SqliteProvider::new(conn, sql_config)?));
        }

        if let Some(chain) = &config.default_codecs {
            service.set_default_codecs(chain.iter().cloned());
        }
        Ok(service)
    }

    /// Register a provider for a scheme, returning the one it replaced
    pub fn register_provider(
        &self,
        scheme: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Option<Arc<dyn Provider>> {
        self.providers.register(scheme, provider)
    }

    pub fn provider(&self, scheme: &str) -> Result<Arc<dyn Provider>> {
        self.providers.get(scheme)
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Attach metadata (codec chain, fields) to `T`
    pub fn describe<T: 'static>(&self, metadata: TypeMetadata) {
        self.types.describe::<T>(metadata);
    }

    pub fn metadata<T: 'static>(&self) -> Option<Arc<TypeMetadata>> {
        self.types.get::<T>()
    }

    /// Chain used by types without one of their own
    pub fn set_default_codecs<I, S>(&self, chain: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.default_codecs.write() = chain.into_iter().map(Into::into).collect();
    }

    pub fn default_codecs(&self) -> Vec<String> {
        self.default_codecs.read().clone()
    }

    // ========== Entry Points ==========

    /// Read and decode the value at `uri`
    pub async fn get<T: DeserializeOwned + 'static>(&self, uri: &str) -> Result<T> {
        let (uri, provider) = self.route(uri)?;
        let chain = self.chain_for::<T>()?;
        let raw = provider.get(&uri).await?;
        self.decode(&chain, &raw)
    }

    /// Encode and store `value` at `uri`
    pub async fn set<T: Serialize + 'static>(&self, uri: &str, value: &T) -> Result<()> {
        let (uri, provider) = self.route(uri)?;
        let chain = self.chain_for::<T>()?;
        let bytes = self.encode(&chain, value)?;
        provider.set(&uri, &bytes).await
    }

    pub async fn delete(&self, uri: &str) -> Result<()> {
        let (uri, provider) = self.route(uri)?;
        provider.delete(&uri).await
    }

    pub async fn exists(&self, uri: &str) -> Result<bool> {
        let (uri, provider) = self.route(uri)?;
        provider.exists(&uri).await
    }

    /// Run a provider action: `payload` is encoded with `P`'s chain and
    /// the response decoded with `R`'s.
    pub async fn exec<R, P>(&self, uri: &str, payload: &P) -> Result<R>
    where
        R: DeserializeOwned + 'static,
        P: Serialize + 'static,
    {
        let (uri, provider) = self.route(uri)?;
        let request = self.encode(&self.chain_for::<P>()?, payload)?;
        let response = provider.execute(&uri, &request).await?;
        self.decode(&self.chain_for::<R>()?, &response)
    }

    /// Watch `uri` with a raw-bytes callback
    pub async fn sync(&self, uri: &str, callback: WatchCallback) -> Result<WatchHandle> {
        let (uri, provider) = self.route(uri)?;
        provider.sync(&uri, callback).await
    }

    /// Close every provider. All are closed even if one fails; the first
    /// error is returned.
    pub async fn close(&self) -> Result<()> {
        let mut first_err = None;
        for (scheme, provider) in self.providers.all() {
            if let Err(e) = provider.close().await {
                tracing::warn!("closing {}:// failed: {}", scheme, e);
                first_err.get_or_insert(e);
            }
        }
        tracing::info!("service closed");
        first_err.map_or(Ok(()), Err)
    }

    // ========== Codec Chain ==========

    fn route(&self, raw: &str) -> Result<(ResourceUri, Arc<dyn Provider>)> {
        let uri = ResourceUri::parse(raw);
        let provider = self.providers.resolve(&uri)?;
        Ok((uri, provider))
    }

    /// Ordered codec names for `T`; empty is `NoCodecs`
    fn chain_for<T: 'static>(&self) -> Result<Vec<String>> {
        let (name, chain) = match self.types.get::<T>() {
            Some(meta) if !meta.codecs.is_empty() => (meta.name.clone(), meta.codecs.clone()),
            Some(meta) => (meta.name.clone(), self.default_codecs()),
            None => (std::any::type_name::<T>().to_string(), self.default_codecs()),
        };
        if chain.is_empty() {
            return Err(Error::NoCodecs(name));
        }
        Ok(chain)
    }

    fn encode<T: Serialize>(&self, chain: &[String], value: &T) -> Result<Vec<u8>> {
        let value = serde_json::to_value(value)?;
        let mut last_err = None;
        for name in chain {
            let attempt = match self.codecs.get(name) {
                Some(codec) => codec.encode(&value),
                None => Err(Error::Codec(format!("codec {:?} is not registered", name))),
            };
            match attempt {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::debug!("codec {} failed to encode: {}", name, e);
                    last_err = Some(e);
                }
            }
        }
        Err(all_failed(last_err, chain))
    }

    fn decode<T: DeserializeOwned>(&self, chain: &[String], bytes: &[u8]) -> Result<T> {
        let mut last_err = None;
        for name in chain {
            let attempt = match self.codecs.get(name) {
                Some(codec) => codec
                    .decode(bytes)
                    .and_then(|value| serde_json::from_value::<T>(value).map_err(Error::from)),
                None => Err(Error::Codec(format!("codec {:?} is not registered", name))),
            };
            match attempt {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::debug!("codec {} failed to decode: {}", name, e);
                    last_err = Some(e);
                }
            }
        }
        Err(all_failed(last_err, chain))
    }
}

fn all_failed(last_err: Option<Error>, chain: &[String]) -> Error {
    let last = last_err.unwrap_or_else(|| Error::NoCodecs(chain.join(",")));
    Error::AllCodecsFailed(Box::new(last))
}
