//! Cache invalidation events exchanged between service instances.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventError;

/// Kind of mutation a cache event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheEventType {
    Evict,
    Clear,
    Update,
    Put,
}

impl CacheEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventType::Evict => "EVICT",
            CacheEventType::Clear => "CLEAR",
            CacheEventType::Update => "UPDATE",
            CacheEventType::Put => "PUT",
        }
    }

    /// Returns true if events of this type address a single key.
    pub fn requires_key(&self) -> bool {
        !matches!(self, CacheEventType::Clear)
    }
}

impl fmt::Display for CacheEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation of a named cache, broadcast so other instances can drop
/// their local copies.
///
/// `cache_key` is `None` if and only if the event type is CLEAR. The
/// invariant holds for constructed and deserialized events alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCacheEvent")]
pub struct CacheEvent {
    event_type: CacheEventType,
    cache_name: String,
    cache_key: Option<String>,
    timestamp: DateTime<Utc>,
    source_service: String,
}

impl CacheEvent {
    /// Builds an event, validating the key/type invariant.
    pub fn new(
        event_type: CacheEventType,
        cache_name: impl Into<String>,
        cache_key: Option<String>,
        source_service: impl Into<String>,
    ) -> Result<Self, EventError> {
        validate_key(event_type, cache_key.as_deref())?;
        Ok(Self {
            event_type,
            cache_name: cache_name.into(),
            cache_key,
            timestamp: Utc::now(),
            source_service: source_service.into(),
        })
    }

    pub fn evict(
        cache_name: impl Into<String>,
        cache_key: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self::keyed(CacheEventType::Evict, cache_name, cache_key, source_service)
    }

    pub fn update(
        cache_name: impl Into<String>,
        cache_key: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self::keyed(CacheEventType::Update, cache_name, cache_key, source_service)
    }

    pub fn put(
        cache_name: impl Into<String>,
        cache_key: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self::keyed(CacheEventType::Put, cache_name, cache_key, source_service)
    }

    pub fn clear(cache_name: impl Into<String>, source_service: impl Into<String>) -> Self {
        Self {
            event_type: CacheEventType::Clear,
            cache_name: cache_name.into(),
            cache_key: None,
            timestamp: Utc::now(),
            source_service: source_service.into(),
        }
    }

    fn keyed(
        event_type: CacheEventType,
        cache_name: impl Into<String>,
        cache_key: impl Into<String>,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            cache_name: cache_name.into(),
            cache_key: Some(cache_key.into()),
            timestamp: Utc::now(),
            source_service: source_service.into(),
        }
    }

    /// Overrides the timestamp (useful for testing).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_type(&self) -> CacheEventType {
        self.event_type
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_service(&self) -> &str {
        &self.source_service
    }

    /// Encodes the event as its JSON wire shape.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Decodes an event from its JSON wire shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

fn validate_key(event_type: CacheEventType, cache_key: Option<&str>) -> Result<(), EventError> {
    match (event_type.requires_key(), cache_key) {
        (true, None) => Err(EventError::MissingCacheKey {
            event_type: event_type.as_str(),
        }),
        (false, Some(_)) => Err(EventError::UnexpectedCacheKey),
        _ => Ok(()),
    }
}

/// Unvalidated wire shape, checked on the way into [`CacheEvent`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCacheEvent {
    event_type: CacheEventType,
    cache_name: String,
    #[serde(default)]
    cache_key: Option<String>,
    timestamp: DateTime<Utc>,
    source_service: String,
}

impl TryFrom<RawCacheEvent> for CacheEvent {
    type Error = EventError;

    fn try_from(raw: RawCacheEvent) -> Result<Self, Self::Error> {
        validate_key(raw.event_type, raw.cache_key.as_deref())?;
        Ok(Self {
            event_type: raw.event_type,
            cache_name: raw.cache_name,
            cache_key: raw.cache_key,
            timestamp: raw.timestamp,
            source_service: raw.source_service,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_clear_has_no_key() {
        let event = CacheEvent::clear("food-info", "food-service");
        assert_eq!(event.event_type(), CacheEventType::Clear);
        assert_eq!(event.cache_key(), None);
    }

    #[test]
    fn test_keyed_constructors_carry_key() {
        for event in [
            CacheEvent::evict("food", "42", "svc"),
            CacheEvent::update("food", "42", "svc"),
            CacheEvent::put("food", "42", "svc"),
        ] {
            assert_eq!(event.cache_key(), Some("42"));
            assert_eq!(event.cache_name(), "food");
            assert_eq!(event.source_service(), "svc");
        }
    }

    #[test]
    fn test_new_rejects_missing_key() {
        for event_type in [
            CacheEventType::Evict,
            CacheEventType::Update,
            CacheEventType::Put,
        ] {
            let result = CacheEvent::new(event_type, "food", None, "svc");
            assert_eq!(
                result.unwrap_err(),
                EventError::MissingCacheKey {
                    event_type: event_type.as_str()
                }
            );
        }
    }

    #[test]
    fn test_new_rejects_clear_with_key() {
        let result = CacheEvent::new(CacheEventType::Clear, "food", Some("42".into()), "svc");
        assert_eq!(result.unwrap_err(), EventError::UnexpectedCacheKey);
    }

    #[test]
    fn test_wire_shape() {
        let event =
            CacheEvent::evict("food", "42", "food-service").with_timestamp(fixed_timestamp());
        let value: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "eventType": "EVICT",
                "cacheName": "food",
                "cacheKey": "42",
                "timestamp": "2024-06-15T10:30:00Z",
                "sourceService": "food-service",
            })
        );
    }

    #[test]
    fn test_clear_serializes_null_key() {
        let event = CacheEvent::clear("food", "svc");
        let value: serde_json::Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(value["cacheKey"], serde_json::Value::Null);
        assert_eq!(value["eventType"], "CLEAR");
    }

    #[test]
    fn test_from_bytes_accepts_valid_payload() {
        let payload = br#"{"eventType":"PUT","cacheName":"user","cacheKey":"1","timestamp":"2024-06-15T10:30:00Z","sourceService":"user-service"}"#;
        let event = CacheEvent::from_bytes(payload).unwrap();
        assert_eq!(event.event_type(), CacheEventType::Put);
        assert_eq!(event.cache_key(), Some("1"));
        assert_eq!(event.timestamp(), fixed_timestamp());
    }

    #[test]
    fn test_from_bytes_rejects_keyless_evict() {
        let payload = br#"{"eventType":"EVICT","cacheName":"user","cacheKey":null,"timestamp":"2024-06-15T10:30:00Z","sourceService":"user-service"}"#;
        let err = CacheEvent::from_bytes(payload).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn test_from_bytes_rejects_keyed_clear() {
        let payload = br#"{"eventType":"CLEAR","cacheName":"user","cacheKey":"1","timestamp":"2024-06-15T10:30:00Z","sourceService":"user-service"}"#;
        assert!(CacheEvent::from_bytes(payload).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_unknown_type() {
        let payload = br#"{"eventType":"REFRESH","cacheName":"user","cacheKey":"1","timestamp":"2024-06-15T10:30:00Z","sourceService":"svc"}"#;
        assert!(CacheEvent::from_bytes(payload).is_err());
        assert!(CacheEvent::from_bytes(b"not json").is_err());
    }
}
