//! Polymorphic envelope for domain events.
//!
//! Domain events travel as a JSON object carrying a `__type` tag next to
//! the event's own fields. Receivers look the tag up in an
//! [`EventTypeRegistry`] to rebuild the concrete type, so adding a new
//! event only requires registering it.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::{AnyDomainEvent, DomainEvent, EventError};

/// Name of the envelope field carrying the concrete type tag.
pub const TYPE_TAG_FIELD: &str = "__type";

type Decoder = fn(Value) -> Result<Box<dyn AnyDomainEvent>, serde_json::Error>;

fn decode_as<E: DomainEvent>(value: Value) -> Result<Box<dyn AnyDomainEvent>, serde_json::Error> {
    let event: E = serde_json::from_value(value)?;
    Ok(Box::new(event))
}

/// Explicit tag to concrete-type registry.
#[derive(Clone, Default)]
pub struct EventTypeRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event type under its [`DomainEvent::EVENT_TYPE`] tag.
    ///
    /// Registering the same type twice is a no-op.
    pub fn register<E: DomainEvent>(&mut self) -> &mut Self {
        self.decoders.insert(E::EVENT_TYPE, decode_as::<E>);
        self
    }

    /// Builder-style variant of [`EventTypeRegistry::register`].
    pub fn with<E: DomainEvent>(mut self) -> Self {
        self.register::<E>();
        self
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Registered tags, sorted.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Encodes an event into its tagged envelope.
    ///
    /// Encoding does not require the type to be registered; whether the
    /// receiver understands it is decided on the receiving side.
    pub fn encode<E: DomainEvent>(event: &E) -> Result<Vec<u8>, EventError> {
        let value =
            serde_json::to_value(event).map_err(|e| EventError::Serialization(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(EventError::Serialization(format!(
                "{} must serialize to a JSON object",
                E::EVENT_TYPE
            )));
        };
        fields.insert(
            TYPE_TAG_FIELD.to_string(),
            Value::String(E::EVENT_TYPE.to_string()),
        );
        serde_json::to_vec(&Value::Object(fields))
            .map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Decodes a tagged envelope into the registered concrete type.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn AnyDomainEvent>, EventError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(EventError::Malformed(
                "envelope is not a JSON object".to_string(),
            ));
        };
        let tag = match fields.remove(TYPE_TAG_FIELD) {
            Some(Value::String(tag)) => tag,
            Some(_) => {
                return Err(EventError::Malformed(format!(
                    "{} must be a string",
                    TYPE_TAG_FIELD
                )))
            }
            None => {
                return Err(EventError::Malformed(format!(
                    "missing {} field",
                    TYPE_TAG_FIELD
                )))
            }
        };
        let decoder = self
            .decoders
            .get(tag.as_str())
            .ok_or_else(|| EventError::UnknownType(tag.clone()))?;

        decoder(Value::Object(fields))
            .map_err(|e| EventError::Malformed(format!("{}: {}", tag, e)))
    }
}

impl fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTypeRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMetadata;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct WaterLogged {
        #[serde(flatten)]
        metadata: EventMetadata,
        millilitres: u32,
    }

    impl DomainEvent for WaterLogged {
        const EVENT_TYPE: &'static str = "WaterLogged";

        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GoalReached {
        #[serde(flatten)]
        metadata: EventMetadata,
        goal: String,
    }

    impl DomainEvent for GoalReached {
        const EVENT_TYPE: &'static str = "GoalReached";

        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }
    }

    fn water() -> WaterLogged {
        WaterLogged {
            metadata: EventMetadata::new("user-9", 2, "diet-service"),
            millilitres: 250,
        }
    }

    #[test]
    fn test_encode_adds_type_tag() {
        let bytes = EventTypeRegistry::encode(&water()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value[TYPE_TAG_FIELD], "WaterLogged");
        assert_eq!(value["aggregateId"], "user-9");
        assert_eq!(value["version"], 2);
        assert_eq!(value["source"], "diet-service");
        assert_eq!(value["millilitres"], 250);
        assert!(value["eventId"].is_string());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_decode_rebuilds_concrete_type() {
        let registry = EventTypeRegistry::new()
            .with::<WaterLogged>()
            .with::<GoalReached>();
        let event = water();
        let bytes = EventTypeRegistry::encode(&event).unwrap();

        let decoded = registry.decode(&bytes).unwrap();
        assert_eq!(decoded.event_type(), "WaterLogged");
        assert_eq!(decoded.downcast_ref::<WaterLogged>(), Some(&event));
        assert!(decoded.downcast_ref::<GoalReached>().is_none());
    }

    #[test]
    fn test_decode_unknown_type() {
        let registry = EventTypeRegistry::new().with::<GoalReached>();
        let bytes = EventTypeRegistry::encode(&water()).unwrap();

        let err = registry.decode(&bytes).unwrap_err();
        assert_eq!(err, EventError::UnknownType("WaterLogged".to_string()));
    }

    #[test]
    fn test_decode_malformed_payloads() {
        let registry = EventTypeRegistry::new().with::<WaterLogged>();

        for payload in [
            b"not json".as_slice(),
            b"[1, 2, 3]".as_slice(),
            br#"{"eventId": "x"}"#.as_slice(),
            br#"{"__type": 7}"#.as_slice(),
            br#"{"__type": "WaterLogged", "millilitres": "lots"}"#.as_slice(),
        ] {
            let err = registry.decode(payload).unwrap_err();
            assert!(matches!(err, EventError::Malformed(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = EventTypeRegistry::new();
        registry.register::<WaterLogged>().register::<WaterLogged>();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("WaterLogged"));
        assert!(!registry.contains("GoalReached"));
    }

    #[test]
    fn test_event_types_sorted() {
        let registry = EventTypeRegistry::new()
            .with::<WaterLogged>()
            .with::<GoalReached>();
        assert_eq!(registry.event_types(), vec!["GoalReached", "WaterLogged"]);
    }
}
