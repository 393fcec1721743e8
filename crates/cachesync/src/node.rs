//! Process-wide wiring of pools, brokers, stores and buses.

use std::sync::Arc;

use thiserror::Error;

use cachesync_core::broker::{BrokerError, EventBroker, Subscription};
use cachesync_core::cache::{Cache, CacheError};
use cachesync_core::events::EventTypeRegistry;

use crate::broker::MemoryBroker;
use crate::bus::{CacheEventBus, CacheEventListener, DomainEventBus};
use crate::cache::{CacheManager, MemoryCache};
use crate::config::{BrokerBackend, Config};
use crate::handlers::{CacheInvalidationHandler, LocalInvalidationHandler};
use crate::pool::TaskPool;

/// Errors raised while starting a node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Remote cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Backend '{0}' requires the `redis` feature")]
    FeatureDisabled(BrokerBackend),
}

/// Everything one process needs to cache and stay coherent.
///
/// Built once at start-up and shared for the lifetime of the process.
pub struct CacheNode {
    config: Config,
    writeback: TaskPool,
    dispatch: TaskPool,
    cache_broker: Arc<dyn EventBroker>,
    domain_broker: Arc<dyn EventBroker>,
    cache_events: Arc<CacheEventBus>,
    domain_events: DomainEventBus,
    invalidation_events: DomainEventBus,
    caches: Arc<CacheManager>,
}

impl CacheNode {
    /// Connects to the configured backend and wires the buses.
    pub async fn build(config: &Config) -> Result<Self, NodeError> {
        let writeback = TaskPool::new("writeback", config.writeback_workers);
        let dispatch = TaskPool::new("dispatch", config.dispatch_workers);

        let Connections {
            remote,
            cache_broker,
            domain_broker,
            invalidation_broker,
        } = connect(config, &dispatch).await?;

        let cache_events = Arc::new(CacheEventBus::new(
            Arc::clone(&cache_broker),
            config.service_name.clone(),
        ));
        let domain_events = DomainEventBus::new(
            Arc::clone(&domain_broker),
            EventTypeRegistry::with_builtin_events(),
        );
        let invalidation_events =
            DomainEventBus::new(invalidation_broker, EventTypeRegistry::with_builtin_events());
        let caches = Arc::new(
            CacheManager::new(remote, writeback.clone(), config.default_cache_spec())
                .with_specs(config.cache_specs.clone())
                .with_event_bus(Arc::clone(&cache_events)),
        );

        tracing::info!(
            service = %config.service_name,
            instance = %config.instance_id,
            backend = %config.broker_backend,
            writeback_workers = writeback.size(),
            dispatch_workers = dispatch.size(),
            "Cache node ready"
        );

        Ok(Self {
            config: config.clone(),
            writeback,
            dispatch,
            cache_broker,
            domain_broker,
            cache_events,
            domain_events,
            invalidation_events,
            caches,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn caches(&self) -> &Arc<CacheManager> {
        &self.caches
    }

    pub fn cache_events(&self) -> &Arc<CacheEventBus> {
        &self.cache_events
    }

    pub fn domain_events(&self) -> &DomainEventBus {
        &self.domain_events
    }

    pub fn cache_broker(&self) -> Arc<dyn EventBroker> {
        Arc::clone(&self.cache_broker)
    }

    pub fn domain_broker(&self) -> Arc<dyn EventBroker> {
        Arc::clone(&self.domain_broker)
    }

    /// Subscribes the local invalidation handlers to both buses.
    ///
    /// Every instance receives every domain event here, even on the
    /// stream backend, where the invalidation container reads through a
    /// consumer group of its own.
    ///
    /// Dropping the returned subscriptions does not stop them; call
    /// `unsubscribe` on each.
    pub async fn start_listeners(&self) -> Result<Vec<Subscription>, NodeError> {
        let handler = LocalInvalidationHandler::new(Arc::clone(&self.caches))
            .with_dependents(self.config.cache_dependencies.clone());
        let listener = Arc::new(CacheEventListener::new(
            self.config.service_name.clone(),
            handler,
        ));
        let cache_subscription = self.cache_events.listen(listener).await?;

        let container = Arc::new(self.invalidation_events.container());
        container
            .register(Arc::new(CacheInvalidationHandler::new(
                Arc::clone(&self.caches),
                self.config.domain_invalidations.clone(),
            )))
            .await;
        let domain_subscription = match self.invalidation_events.subscribe(container).await {
            Ok(subscription) => subscription,
            Err(e) => {
                cache_subscription.unsubscribe();
                return Err(e.into());
            }
        };

        Ok(vec![cache_subscription, domain_subscription])
    }

    /// Waits for queued write-backs and in-flight deliveries.
    pub async fn shutdown(&self) {
        tracing::info!(
            pending_writebacks = self.writeback.in_flight(),
            pending_deliveries = self.dispatch.in_flight(),
            "Draining cache node"
        );
        self.writeback.drain().await;
        self.dispatch.drain().await;
    }
}

struct Connections {
    remote: Arc<dyn Cache>,
    cache_broker: Arc<dyn EventBroker>,
    /// Shared by every instance of the service.
    domain_broker: Arc<dyn EventBroker>,
    /// Reaches this instance whatever the other instances consume.
    invalidation_broker: Arc<dyn EventBroker>,
}

async fn connect(config: &Config, dispatch: &TaskPool) -> Result<Connections, NodeError> {
    match config.broker_backend {
        BrokerBackend::Memory => {
            let remote: Arc<dyn Cache> = Arc::new(MemoryCache::new(config.cache_max_entries.max(1)));
            let broker: Arc<dyn EventBroker> = Arc::new(MemoryBroker::new(dispatch.clone()));
            Ok(Connections {
                remote,
                cache_broker: Arc::clone(&broker),
                domain_broker: Arc::clone(&broker),
                invalidation_broker: broker,
            })
        }
        #[cfg(feature = "redis")]
        backend => connect_redis(config, backend, dispatch).await,
        #[cfg(not(feature = "redis"))]
        backend => Err(NodeError::FeatureDisabled(backend)),
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(
    config: &Config,
    backend: BrokerBackend,
    dispatch: &TaskPool,
) -> Result<Connections, NodeError> {
    use crate::broker::{RedisPubSubBroker, RedisStreamBroker, StreamOptions};
    use crate::cache::RedisCache;

    let remote: Arc<dyn Cache> =
        Arc::new(RedisCache::new(&config.redis_url, config.remote_timeout()).await?);

    // Cache events must reach every process, so they always fan out.
    let pubsub: Arc<dyn EventBroker> = Arc::new(
        RedisPubSubBroker::new(&config.redis_url, config.publish_timeout(), dispatch.clone())
            .await?,
    );

    if backend != BrokerBackend::Stream {
        return Ok(Connections {
            remote,
            cache_broker: Arc::clone(&pubsub),
            domain_broker: Arc::clone(&pubsub),
            invalidation_broker: pubsub,
        });
    }

    let shared = StreamOptions {
        partitions: config.stream_partitions,
        max_len: config.stream_max_len,
        group: config.consumer_group.clone(),
        consumer: config.consumer_name.clone(),
        timeout: config.publish_timeout(),
    };
    let per_instance = StreamOptions {
        group: config.invalidation_group(),
        consumer: config.instance_id.clone(),
        ..shared.clone()
    };

    let domain_broker: Arc<dyn EventBroker> =
        Arc::new(RedisStreamBroker::new(&config.redis_url, shared, dispatch.clone()).await?);
    let invalidation_broker: Arc<dyn EventBroker> =
        Arc::new(RedisStreamBroker::new(&config.redis_url, per_instance, dispatch.clone()).await?);

    Ok(Connections {
        remote,
        cache_broker: pubsub,
        domain_broker,
        invalidation_broker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use cachesync_core::events::{ChangeKind, FoodInfoChanged};

    fn memory_config() -> Config {
        let mut dependencies = HashMap::new();
        dependencies.insert("food".to_string(), vec!["meal-summary".to_string()]);
        let mut invalidations = HashMap::new();
        invalidations.insert("FoodInfoChanged".to_string(), vec!["search".to_string()]);

        Config {
            service_name: "diet-service".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            broker_backend: BrokerBackend::Memory,
            cache_ttl_seconds: 60,
            cache_max_entries: 100,
            cache_specs: HashMap::new(),
            writeback_workers: 2,
            dispatch_workers: 2,
            remote_timeout_ms: 500,
            publish_timeout_ms: 1_000,
            stream_partitions: 4,
            stream_max_len: 1_000,
            consumer_group: "diet-service".to_string(),
            consumer_name: "diet-service".to_string(),
            instance_id: "pod-a".to_string(),
            cache_dependencies: dependencies,
            domain_invalidations: invalidations,
        }
    }

    async fn wait_until_empty(cache: &MemoryCache) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cache.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("local cache was not emptied in time");
    }

    #[tokio::test]
    async fn test_cache_event_from_other_service_invalidates() {
        let node = CacheNode::build(&memory_config()).await.unwrap();
        let subscriptions = node.start_listeners().await.unwrap();

        let food = node.caches().cache("food");
        let summary = node.caches().cache("meal-summary");
        food.put("42", &"apple").await.unwrap();
        summary.put("today", &1800).await.unwrap();

        let other = CacheEventBus::new(node.cache_broker(), "food-service");
        other.publish_evict("food", "42").await.unwrap();

        wait_until_empty(summary.local()).await;
        assert!(food.local().is_empty().await);

        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    #[tokio::test]
    async fn test_domain_event_clears_mapped_cache() {
        let node = CacheNode::build(&memory_config()).await.unwrap();
        let _subscriptions = node.start_listeners().await.unwrap();

        let search = node.caches().cache("search");
        search.put("apple", &vec![42]).await.unwrap();

        let event = FoodInfoChanged::new(42, ChangeKind::Updated, 2, "food-service");
        node.domain_events().publish(&event).await.unwrap();

        wait_until_empty(search.local()).await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_writebacks() {
        let node = CacheNode::build(&memory_config()).await.unwrap();

        node.caches().cache("food").put("1", &"pear").await.unwrap();
        node.shutdown().await;

        assert_eq!(node.writeback.in_flight(), 0);
    }

    #[cfg(feature = "redis")]
    #[tokio::test]
    async fn test_stream_domain_event_reaches_every_instance() {
        let channel_suffix = uuid::Uuid::new_v4().simple().to_string();
        let stream_config = |instance: &str| {
            let mut config = memory_config();
            config.broker_backend = BrokerBackend::Stream;
            config.redis_url = std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string());
            config.consumer_group = format!("diet-service-{}", channel_suffix);
            config.instance_id = instance.to_string();
            config
        };

        let Ok(first) = CacheNode::build(&stream_config("pod-a")).await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };
        let Ok(second) = CacheNode::build(&stream_config("pod-b")).await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let mut subscriptions = first.start_listeners().await.unwrap();
        subscriptions.extend(second.start_listeners().await.unwrap());

        let first_search = first.caches().cache("search");
        let second_search = second.caches().cache("search");
        first_search.put("apple", &vec![42]).await.unwrap();
        second_search.put("apple", &vec![42]).await.unwrap();

        let event = FoodInfoChanged::new(42, ChangeKind::Updated, 2, "food-service");
        first.domain_events().publish(&event).await.unwrap();

        wait_until_empty(first_search.local()).await;
        wait_until_empty(second_search.local()).await;

        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_backend_needs_feature() {
        let mut config = memory_config();
        config.broker_backend = BrokerBackend::PubSub;

        let result = CacheNode::build(&config).await;
        assert!(matches!(result, Err(NodeError::FeatureDisabled(BrokerBackend::PubSub))));
    }
}
