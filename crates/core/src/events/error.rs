use thiserror::Error;

use crate::broker::BrokerError;

/// Errors raised while building, encoding or decoding events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("{event_type} events require a cache key")]
    MissingCacheKey { event_type: &'static str },
    #[error("CLEAR events must not carry a cache key")]
    UnexpectedCacheKey,
    #[error("Malformed event payload: {0}")]
    Malformed(String),
    #[error("Unknown event type: {0}")]
    UnknownType(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Error returned by an event handler.
///
/// Handler failures are logged by the dispatcher and never stop delivery
/// to other handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::cache::CacheError> for HandlerError {
    fn from(err: crate::cache::CacheError) -> Self {
        Self(err.to_string())
    }
}

/// Errors that can occur when publishing an event on a bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
