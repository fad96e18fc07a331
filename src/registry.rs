//! Provider registry - scheme -> backend instance

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::provider::Provider;
use crate::uri::ResourceUri;
use crate::{Error, Result};

/// Maps a URI scheme to the provider serving it.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a scheme, returning the one it replaced
    pub fn register(
        &self,
        scheme: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Option<Arc<dyn Provider>> {
        let scheme = scheme.into();
        tracing::info!("Registering provider for scheme {}://", scheme);
        self.providers.write().insert(scheme, provider)
    }

    /// Remove the provider for a scheme
    pub fn unregister(&self, scheme: &str) -> Option<Arc<dyn Provider>> {
        self.providers.write().remove(scheme)
    }

    /// Provider for a scheme
    pub fn get(&self, scheme: &str) -> Result<Arc<dyn Provider>> {
        if scheme.is_empty() {
            return Err(Error::ProviderNotFound(String::new()));
        }
        self.providers
            .read()
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(scheme.to_string()))
    }

    /// Provider serving a URI; unusable URIs resolve to `ProviderNotFound`
    pub fn resolve(&self, uri: &ResourceUri) -> Result<Arc<dyn Provider>> {
        self.get(uri.scheme())
    }

    /// Registered schemes, sorted
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.providers.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Snapshot of every registered provider
    pub(crate) fn all(&self) -> Vec<(String, Arc<dyn Provider>)> {
        self.providers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryProvider;

    #[test]
    fn test_register_and_resolve() {
        let registry = ProviderRegistry::new();
        assert!(registry.register("memory", Arc::new(MemoryProvider::new())).is_none());
        assert_eq!(registry.schemes(), vec!["memory"]);

        assert!(registry.resolve(&ResourceUri::parse("memory://t/a")).is_ok());

        let err = registry.resolve(&ResourceUri::parse("redis://t/a")).err().unwrap();
        assert!(matches!(err, Error::ProviderNotFound(s) if s == "redis"));
    }

    #[test]
    fn test_malformed_uri_is_provider_not_found() {
        let registry = ProviderRegistry::new();
        registry.register("memory", Arc::new(MemoryProvider::new()));

        let err = registry.resolve(&ResourceUri::parse("not a uri")).err().unwrap();
        assert!(matches!(err, Error::ProviderNotFound(_)));
    }

    #[test]
    fn test_unregister() {
        let registry = ProviderRegistry::new();
        registry.register("memory", Arc::new(MemoryProvider::new()));
        assert!(registry.unregister("memory").is_some());
        assert!(registry.get("memory").is_err());
    }
}
