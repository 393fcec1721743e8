//! Receiving side of the cache event stream.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;

use cachesync_core::broker::{BrokerMessage, MessageHandler};
use cachesync_core::events::{CacheEvent, CacheEventType, HandlerError};

/// Reaction to cache events from other services.
///
/// Updates and puts default to the eviction path: a changed value is
/// stale locally either way.
#[async_trait]
pub trait CacheEventHandler: Send + Sync {
    async fn handle_evict(&self, cache_name: &str, cache_key: &str) -> Result<(), HandlerError>;

    async fn handle_clear(&self, cache_name: &str) -> Result<(), HandlerError>;

    async fn handle_update(&self, cache_name: &str, cache_key: &str) -> Result<(), HandlerError> {
        self.handle_evict(cache_name, cache_key).await
    }

    async fn handle_put(&self, cache_name: &str, cache_key: &str) -> Result<(), HandlerError> {
        self.handle_evict(cache_name, cache_key).await
    }
}

/// Filters inbound cache events and routes them to a [`CacheEventHandler`].
pub struct CacheEventListener<H> {
    service: String,
    interest: Option<HashSet<String>>,
    handler: H,
}

impl<H: CacheEventHandler> CacheEventListener<H> {
    /// Listener for every cache, ignoring events emitted by `service`.
    pub fn new(service: impl Into<String>, handler: H) -> Self {
        Self {
            service: service.into(),
            interest: None,
            handler,
        }
    }

    /// Restricts the listener to the given cache names.
    pub fn with_interest<I, S>(mut self, cache_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interest = Some(cache_names.into_iter().map(Into::into).collect());
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Whether this listener should react to `event`.
    ///
    /// Events from the listener's own service are rejected, as are events
    /// for caches outside the interest set.
    pub fn supports(&self, event: &CacheEvent) -> bool {
        if event.source_service() == self.service {
            return false;
        }
        match &self.interest {
            Some(names) => names.contains(event.cache_name()),
            None => true,
        }
    }

    /// Routes an event to the handler method for its type.
    pub async fn on_event(&self, event: &CacheEvent) -> Result<(), HandlerError> {
        let cache_name = event.cache_name();
        match (event.event_type(), event.cache_key()) {
            (CacheEventType::Clear, _) => self.handler.handle_clear(cache_name).await,
            (CacheEventType::Evict, Some(key)) => self.handler.handle_evict(cache_name, key).await,
            (CacheEventType::Update, Some(key)) => {
                self.handler.handle_update(cache_name, key).await
            }
            (CacheEventType::Put, Some(key)) => self.handler.handle_put(cache_name, key).await,
            (event_type, None) => Err(HandlerError::new(format!(
                "{} event for {} has no key",
                event_type, cache_name
            ))),
        }
    }
}

#[async_trait]
impl<H: CacheEventHandler> MessageHandler for CacheEventListener<H> {
    async fn on_message(&self, message: BrokerMessage) {
        let event = match CacheEvent::from_bytes(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    channel = %message.channel,
                    error = %e,
                    payload = %message.payload_lossy(),
                    "Dropping malformed cache event"
                );
                return;
            }
        };

        if !self.supports(&event) {
            tracing::trace!(
                cache = %event.cache_name(),
                source = %event.source_service(),
                "Skipping unsupported cache event"
            );
            return;
        }

        match AssertUnwindSafe(self.on_event(&event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    event_type = %event.event_type(),
                    cache = %event.cache_name(),
                    key = ?event.cache_key(),
                    error = %e,
                    "Cache event handler failed"
                );
            }
            Err(panic) => {
                tracing::error!(
                    event_type = %event.event_type(),
                    cache = %event.cache_name(),
                    key = ?event.cache_key(),
                    panic = %super::panic_message(&*panic),
                    "Cache event handler panicked"
                );
            }
        }
    }
}
