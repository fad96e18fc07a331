//! Named statement registry

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use super::ast::Statement;
use crate::{Error, Result};

/// Statements registered under a name, executed later by that name.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: RwLock<HashMap<String, Arc<Statement>>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a statement; a taken name is `QueryAlreadyRegistered`
    pub fn register(&self, name: impl Into<String>, stmt: Statement) -> Result<()> {
        let name = name.into();
        let mut queries = self.queries.write();
        if queries.contains_key(&name) {
            return Err(Error::QueryAlreadyRegistered(name));
        }
        tracing::debug!("Registered query {} on {}", name, stmt.table());
        queries.insert(name, Arc::new(stmt));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Statement>> {
        self.queries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::QueryNotRegistered(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<Statement>> {
        self.queries
            .write()
            .remove(name)
            .ok_or_else(|| Error::QueryNotRegistered(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.queries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_unregister() {
        let registry = QueryRegistry::new();
        registry.register("all_users", Statement::select("users")).unwrap();
        registry.register("purge", Statement::delete("users")).unwrap();

        assert_eq!(registry.names(), vec!["all_users", "purge"]);
        assert_eq!(registry.get("all_users").unwrap().table(), "users");

        registry.unregister("purge").unwrap();
        assert!(matches!(registry.get("purge"), Err(Error::QueryNotRegistered(_))));
        assert!(matches!(registry.unregister("purge"), Err(Error::QueryNotRegistered(_))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = QueryRegistry::new();
        registry.register("q", Statement::select("a")).unwrap();

        let err = registry.register("q", Statement::select("b")).unwrap_err();
        assert!(matches!(err, Error::QueryAlreadyRegistered(n) if n == "q"));
        assert_eq!(registry.get("q").unwrap().table(), "a");
    }
}
