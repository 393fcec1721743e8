//! Cache-invalidation event stream.

use std::sync::Arc;

use cachesync_core::broker::{EventBroker, Result as BrokerResult, Subscription};
use cachesync_core::cache::CACHE_EVENTS_CHANNEL;
use cachesync_core::events::{CacheEvent, PublishError};

use super::listener::{CacheEventHandler, CacheEventListener};

/// Publishes and subscribes to cache events on one reserved channel.
///
/// Helpers stamp events with the bus's own service identity, which
/// listeners in the same service use to skip their own events.
#[derive(Clone)]
pub struct CacheEventBus {
    broker: Arc<dyn EventBroker>,
    service: String,
    channel: String,
}

impl CacheEventBus {
    pub fn new(broker: Arc<dyn EventBroker>, service: impl Into<String>) -> Self {
        Self {
            broker,
            service: service.into(),
            channel: CACHE_EVENTS_CHANNEL.to_string(),
        }
    }

    /// Overrides the channel, mostly to isolate tests sharing a broker.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publishes a pre-built event.
    ///
    /// Events are keyed by cache name so the log-based backend keeps the
    /// events of one cache in publish order.
    pub async fn publish(&self, event: &CacheEvent) -> Result<(), PublishError> {
        let payload = event.to_bytes()?;
        self.broker
            .publish_keyed(&self.channel, event.cache_name(), &payload)
            .await?;

        tracing::debug!(
            event_type = %event.event_type(),
            cache = %event.cache_name(),
            key = ?event.cache_key(),
            "Published cache event"
        );
        Ok(())
    }

    pub async fn publish_evict(&self, cache_name: &str, cache_key: &str) -> Result<(), PublishError> {
        self.publish(&CacheEvent::evict(cache_name, cache_key, &self.service))
            .await
    }

    pub async fn publish_clear(&self, cache_name: &str) -> Result<(), PublishError> {
        self.publish(&CacheEvent::clear(cache_name, &self.service))
            .await
    }

    pub async fn publish_update(&self, cache_name: &str, cache_key: &str) -> Result<(), PublishError> {
        self.publish(&CacheEvent::update(cache_name, cache_key, &self.service))
            .await
    }

    pub async fn publish_put(&self, cache_name: &str, cache_key: &str) -> Result<(), PublishError> {
        self.publish(&CacheEvent::put(cache_name, cache_key, &self.service))
            .await
    }

    /// Subscribes a listener to the cache channel.
    pub async fn listen<H>(&self, listener: Arc<CacheEventListener<H>>) -> BrokerResult<Subscription>
    where
        H: CacheEventHandler + 'static,
    {
        let subscription = self.broker.subscribe(&self.channel, listener).await?;
        tracing::info!(
            channel = %self.channel,
            service = %self.service,
            "Cache event listener subscribed"
        );
        Ok(subscription)
    }
}
