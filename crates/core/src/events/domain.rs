//! Domain event abstractions.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every domain event.
///
/// Concrete events embed it with `#[serde(flatten)]` so the fields sit at
/// the top level of the wire shape next to the subtype-specific ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Unique event identifier, never reused.
    pub event_id: Uuid,
    /// Timestamp of event creation.
    pub timestamp: DateTime<Utc>,
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Version of the aggregate after the change.
    pub version: i64,
    /// Service that emitted the event.
    pub source: String,
}

impl EventMetadata {
    /// Creates metadata with a fresh event ID and the current time.
    pub fn new(aggregate_id: impl Into<String>, version: i64, source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            aggregate_id: aggregate_id.into(),
            version,
            source: source.into(),
        }
    }
}

/// Trait that all domain events implement.
pub trait DomainEvent: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Type tag written to the envelope and used for decoding.
    const EVENT_TYPE: &'static str;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;
}

/// Object-safe view of a decoded domain event.
///
/// Handlers receive events through this trait and downcast to the concrete
/// type they care about.
pub trait AnyDomainEvent: fmt::Debug + Send + Sync {
    fn event_type(&self) -> &'static str;

    fn event_metadata(&self) -> &EventMetadata;

    fn as_any(&self) -> &dyn Any;
}

impl<E: DomainEvent> AnyDomainEvent for E {
    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn event_metadata(&self) -> &EventMetadata {
        self.metadata()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<'a> dyn AnyDomainEvent + 'a {
    /// Returns the concrete event if it is of type `E`.
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}
