//! Typed event buses built on an [`EventBroker`](cachesync_core::broker::EventBroker).

use std::any::Any;

mod cache_events;
mod container;
mod domain;
mod listener;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache_events::CacheEventBus;
pub use container::{DeliveryOutcome, DomainEventHandler, DomainEventListenerContainer};
pub use domain::DomainEventBus;
pub use listener::{CacheEventHandler, CacheEventListener};

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
