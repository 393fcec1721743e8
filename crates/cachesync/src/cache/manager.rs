//! Registry of named two-level caches.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cachesync_core::cache::Cache;

use super::TwoLevelCache;
use crate::bus::CacheEventBus;
use crate::config::CacheSpec;
use crate::pool::TaskPool;

/// Hands out one [`TwoLevelCache`] per cache name.
///
/// All caches share the remote store, the write-back pool and, when set,
/// the cache event bus. Each name gets its own local TTL and size bound
/// from the per-cache specs, falling back to the defaults.
#[derive(Clone)]
pub struct CacheManager {
    remote: Arc<dyn Cache>,
    writeback: TaskPool,
    events: Option<Arc<CacheEventBus>>,
    defaults: CacheSpec,
    specs: HashMap<String, CacheSpec>,
    caches: Arc<RwLock<HashMap<String, TwoLevelCache>>>,
}

impl CacheManager {
    pub fn new(remote: Arc<dyn Cache>, writeback: TaskPool, defaults: CacheSpec) -> Self {
        Self {
            remote,
            writeback,
            events: None,
            defaults,
            specs: HashMap::new(),
            caches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Per-cache overrides of the default spec.
    pub fn with_specs(mut self, specs: HashMap<String, CacheSpec>) -> Self {
        self.specs = specs;
        self
    }

    /// Attaches the bus to every cache created from now on.
    pub fn with_event_bus(mut self, events: Arc<CacheEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn spec_for(&self, name: &str) -> CacheSpec {
        self.specs.get(name).copied().unwrap_or(self.defaults)
    }

    /// Returns the cache for `name`, creating it on first use.
    pub fn cache(&self, name: &str) -> TwoLevelCache {
        if let Some(cache) = self.existing(name) {
            return cache;
        }

        let mut caches = self
            .caches
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                let spec = self.spec_for(name);
                tracing::debug!(
                    cache = %name,
                    ttl_secs = spec.ttl.as_secs(),
                    max_entries = spec.max_entries,
                    "Creating cache"
                );
                let cache = TwoLevelCache::new(
                    name,
                    spec.ttl,
                    spec.max_entries,
                    Arc::clone(&self.remote),
                    self.writeback.clone(),
                );
                match &self.events {
                    Some(events) => cache.with_event_bus(Arc::clone(events)),
                    None => cache,
                }
            })
            .clone()
    }

    /// Returns the cache for `name` only if it was already created.
    pub fn existing(&self, name: &str) -> Option<TwoLevelCache> {
        self.caches
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Names of the caches created so far, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .caches
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn default_ttl(&self) -> Duration {
        self.defaults.ttl
    }

    pub fn writeback(&self) -> &TaskPool {
        &self.writeback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn manager() -> CacheManager {
        let defaults = CacheSpec {
            ttl: Duration::from_secs(300),
            max_entries: 100,
        };
        let mut specs = HashMap::new();
        specs.insert(
            "food".to_string(),
            CacheSpec {
                ttl: Duration::from_secs(30),
                max_entries: 2,
            },
        );
        CacheManager::new(
            Arc::new(MemoryCache::new(1_000)),
            TaskPool::new("writeback", 2),
            defaults,
        )
        .with_specs(specs)
    }

    #[tokio::test]
    async fn test_same_name_same_cache() {
        let manager = manager();

        manager.cache("food").put("1", &"apple").await.unwrap();
        let value: Option<String> = manager.cache("food").get_if_present("1").await;

        assert_eq!(value.as_deref(), Some("apple"));
        assert_eq!(manager.cache_names(), vec!["food"]);
    }

    #[test]
    fn test_per_cache_specs() {
        let manager = manager();

        let food = manager.cache("food");
        assert_eq!(food.ttl(), Duration::from_secs(30));
        assert_eq!(food.local().capacity(), 2);

        let user = manager.cache("user");
        assert_eq!(user.ttl(), Duration::from_secs(300));
        assert_eq!(user.local().capacity(), 100);
    }

    #[test]
    fn test_existing_does_not_create() {
        let manager = manager();

        assert!(manager.existing("dashboard").is_none());
        manager.cache("dashboard");
        assert!(manager.existing("dashboard").is_some());
    }
}
