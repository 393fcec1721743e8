//! Fan-out of decoded domain events to registered handlers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::RwLock;

use cachesync_core::broker::{BrokerMessage, MessageHandler};
use cachesync_core::events::{AnyDomainEvent, EventError, EventTypeRegistry, HandlerError};

/// Business-level reaction to domain events.
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Whether this handler wants events with the given type tag.
    fn supports(&self, event_type: &str) -> bool;

    async fn handle(&self, event: &dyn AnyDomainEvent) -> Result<(), HandlerError>;
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The payload could not be decoded and reached no handler.
    Dropped(EventError),
    /// The event was offered to every registered handler.
    Dispatched {
        handled: usize,
        failed: usize,
        skipped: usize,
    },
}

/// Holds the domain handlers of one process.
///
/// Each message is decoded once and then offered to every handler in
/// registration order. A handler that fails or panics is logged and does
/// not prevent the remaining handlers from running. Nothing is retried.
pub struct DomainEventListenerContainer {
    registry: EventTypeRegistry,
    handlers: RwLock<Vec<Arc<dyn DomainEventHandler>>>,
}

impl DomainEventListenerContainer {
    pub fn new(registry: EventTypeRegistry) -> Self {
        Self {
            registry,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, handler: Arc<dyn DomainEventHandler>) {
        tracing::debug!(handler = %handler.name(), "Registered domain event handler");
        self.handlers.write().await.push(handler);
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Decodes a message and offers it to every handler.
    pub async fn dispatch(&self, message: &BrokerMessage) -> DeliveryOutcome {
        let event = match self.registry.decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    channel = %message.channel,
                    error = %e,
                    payload = %message.payload_lossy(),
                    "Dropping undecodable domain event"
                );
                return DeliveryOutcome::Dropped(e);
            }
        };

        let handlers = self.handlers.read().await.clone();
        let event_type = event.event_type();
        let event_id = event.event_metadata().event_id;

        let (mut handled, mut failed, mut skipped) = (0, 0, 0);
        for handler in handlers {
            if !handler.supports(event_type) {
                skipped += 1;
                continue;
            }
            match AssertUnwindSafe(handler.handle(&*event)).catch_unwind().await {
                Ok(Ok(())) => handled += 1,
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(
                        handler = %handler.name(),
                        event_type = %event_type,
                        event_id = %event_id,
                        error = %e,
                        "Domain event handler failed"
                    );
                }
                Err(panic) => {
                    failed += 1;
                    tracing::error!(
                        handler = %handler.name(),
                        event_type = %event_type,
                        event_id = %event_id,
                        panic = %super::panic_message(&*panic),
                        "Domain event handler panicked"
                    );
                }
            }
        }

        tracing::debug!(
            event_type = %event_type,
            event_id = %event_id,
            handled,
            failed,
            skipped,
            "Dispatched domain event"
        );

        DeliveryOutcome::Dispatched {
            handled,
            failed,
            skipped,
        }
    }
}

#[async_trait]
impl MessageHandler for DomainEventListenerContainer {
    async fn on_message(&self, message: BrokerMessage) {
        self.dispatch(&message).await;
    }
}
