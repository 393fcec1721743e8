use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use cachesync_core::events::{AnyDomainEvent, HandlerError};

use crate::bus::DomainEventHandler;
use crate::cache::CacheManager;

/// Clears local caches derived from the data a domain event describes.
///
/// The mapping goes from event type tag to the cache names to clear,
/// e.g. `DietRecordChanged -> [nutrition-stats, dashboard]`.
pub struct CacheInvalidationHandler {
    manager: Arc<CacheManager>,
    mapping: HashMap<String, Vec<String>>,
}

impl CacheInvalidationHandler {
    pub fn new(manager: Arc<CacheManager>, mapping: HashMap<String, Vec<String>>) -> Self {
        Self { manager, mapping }
    }
}

#[async_trait]
impl DomainEventHandler for CacheInvalidationHandler {
    fn name(&self) -> &str {
        "cache-invalidation"
    }

    fn supports(&self, event_type: &str) -> bool {
        self.mapping.contains_key(event_type)
    }

    async fn handle(&self, event: &dyn AnyDomainEvent) -> Result<(), HandlerError> {
        let Some(caches) = self.mapping.get(event.event_type()) else {
            return Ok(());
        };

        for name in caches {
            if let Some(cache) = self.manager.existing(name) {
                tracing::debug!(
                    event_type = %event.event_type(),
                    aggregate_id = %event.event_metadata().aggregate_id,
                    cache = %name,
                    "Clearing cache for domain event"
                );
                cache.clear_local().await?;
            }
        }
        Ok(())
    }
}
