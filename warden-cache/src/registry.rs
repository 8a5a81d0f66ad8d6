//! Named cache partitions.

use crate::error::{CacheError, CacheResult};
use crate::traits::CacheStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of named cache stores.
///
/// Applications usually register a `"session"` store next to a `"default"`
/// one; consumers pick a partition by name at construction time.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    stores: HashMap<String, Arc<dyn CacheStore>>,
}

impl CacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under `name`, replacing any previous one.
    pub fn register(mut self, name: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    /// Look up a store by name.
    pub fn get(&self, name: &str) -> CacheResult<Arc<dyn CacheStore>> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownStore(name.to_string()))
    }

    /// Names of all registered stores.
    pub fn names(&self) -> Vec<&str> {
        self.stores.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("stores", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCache;

    #[tokio::test]
    async fn test_registry_lookup() {
        let session = Arc::new(InMemoryCache::new());
        let registry = CacheRegistry::new()
            .register("session", session.clone())
            .register("default", Arc::new(InMemoryCache::new()));

        let store = registry.get("session").unwrap();
        store.set_json("k", "v".into(), None).await.unwrap();
        assert_eq!(session.get_json("k").await.unwrap(), Some("v".into()));

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["default", "session"]);
    }

    #[test]
    fn test_unknown_store() {
        let registry = CacheRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(CacheError::UnknownStore(name)) if name == "missing"
        ));
    }
}
