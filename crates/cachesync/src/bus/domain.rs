//! Polymorphic domain event stream.

use std::sync::Arc;

use cachesync_core::broker::{EventBroker, Result as BrokerResult, Subscription};
use cachesync_core::cache::DOMAIN_EVENTS_CHANNEL;
use cachesync_core::events::{DomainEvent, EventTypeRegistry, PublishError};

use super::container::DomainEventListenerContainer;

/// Publishes domain events in their tagged envelope and subscribes
/// listener containers to the domain channel.
#[derive(Clone)]
pub struct DomainEventBus {
    broker: Arc<dyn EventBroker>,
    registry: EventTypeRegistry,
    channel: String,
}

impl DomainEventBus {
    pub fn new(broker: Arc<dyn EventBroker>, registry: EventTypeRegistry) -> Self {
        Self {
            broker,
            registry,
            channel: DOMAIN_EVENTS_CHANNEL.to_string(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Publishes an event, partitioned by its type tag.
    ///
    /// The type does not need to be registered locally.
    pub async fn publish<E: DomainEvent>(&self, event: &E) -> Result<(), PublishError> {
        let payload = EventTypeRegistry::encode(event)?;
        self.broker
            .publish_keyed(&self.channel, E::EVENT_TYPE, &payload)
            .await?;

        tracing::debug!(
            event_type = %E::EVENT_TYPE,
            event_id = %event.metadata().event_id,
            aggregate_id = %event.metadata().aggregate_id,
            "Published domain event"
        );
        Ok(())
    }

    /// A container sharing this bus's registry.
    pub fn container(&self) -> DomainEventListenerContainer {
        DomainEventListenerContainer::new(self.registry.clone())
    }

    pub async fn subscribe(
        &self,
        container: Arc<DomainEventListenerContainer>,
    ) -> BrokerResult<Subscription> {
        let subscription = self.broker.subscribe(&self.channel, container).await?;
        tracing::info!(
            channel = %self.channel,
            event_types = ?self.registry.event_types(),
            "Domain event container subscribed"
        );
        Ok(subscription)
    }
}
