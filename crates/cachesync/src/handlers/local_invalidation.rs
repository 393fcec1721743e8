use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use cachesync_core::events::HandlerError;

use crate::bus::CacheEventHandler;
use crate::cache::CacheManager;

/// Applies remote cache events to this process's local tier.
///
/// Only caches this process has already created are touched; a cache
/// that was never used here has nothing local to invalidate. Dependent
/// caches are cleared whenever their source cache changes.
pub struct LocalInvalidationHandler {
    manager: Arc<CacheManager>,
    dependents: HashMap<String, Vec<String>>,
}

impl LocalInvalidationHandler {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            dependents: HashMap::new(),
        }
    }

    /// Maps a source cache to the caches derived from it.
    pub fn with_dependents(mut self, dependents: HashMap<String, Vec<String>>) -> Self {
        self.dependents = dependents;
        self
    }

    async fn clear_dependents(&self, cache_name: &str) -> Result<(), HandlerError> {
        let Some(dependents) = self.dependents.get(cache_name) else {
            return Ok(());
        };
        for dependent in dependents {
            if let Some(cache) = self.manager.existing(dependent) {
                tracing::debug!(source = %cache_name, cache = %dependent, "Clearing dependent cache");
                cache.clear_local().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheEventHandler for LocalInvalidationHandler {
    async fn handle_evict(&self, cache_name: &str, cache_key: &str) -> Result<(), HandlerError> {
        if let Some(cache) = self.manager.existing(cache_name) {
            cache.evict_local(cache_key).await?;
        }
        self.clear_dependents(cache_name).await
    }

    async fn handle_clear(&self, cache_name: &str) -> Result<(), HandlerError> {
        if let Some(cache) = self.manager.existing(cache_name) {
            cache.clear_local().await?;
        }
        self.clear_dependents(cache_name).await
    }
}
