//! Built-in domain events emitted by the nutrition services.
//!
//! These are the facts dependent caches listen to in order to
//! self-invalidate when data changes in another service.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{DomainEvent, EventMetadata, EventTypeRegistry};

/// What happened to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A food catalog item changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodInfoChanged {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub food_id: i64,
    pub change: ChangeKind,
}

impl FoodInfoChanged {
    pub fn new(food_id: i64, change: ChangeKind, version: i64, source: impl Into<String>) -> Self {
        Self {
            metadata: EventMetadata::new(food_id.to_string(), version, source),
            food_id,
            change,
        }
    }
}

impl DomainEvent for FoodInfoChanged {
    const EVENT_TYPE: &'static str = "FoodInfoChanged";

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

/// A user's diet record for one day changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DietRecordChanged {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub user_id: i64,
    pub record_date: NaiveDate,
    pub change: ChangeKind,
}

impl DietRecordChanged {
    pub fn new(
        user_id: i64,
        record_date: NaiveDate,
        change: ChangeKind,
        version: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            metadata: EventMetadata::new(format!("{}:{}", user_id, record_date), version, source),
            user_id,
            record_date,
            change,
        }
    }
}

impl DomainEvent for DietRecordChanged {
    const EVENT_TYPE: &'static str = "DietRecordChanged";

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

/// A user's profile changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileChanged {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub user_id: i64,
    /// Names of the profile fields that changed.
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

impl UserProfileChanged {
    pub fn new(
        user_id: i64,
        changed_fields: Vec<String>,
        version: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            metadata: EventMetadata::new(user_id.to_string(), version, source),
            user_id,
            changed_fields,
        }
    }
}

impl DomainEvent for UserProfileChanged {
    const EVENT_TYPE: &'static str = "UserProfileChanged";

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

impl EventTypeRegistry {
    /// Registry with every built-in event registered.
    pub fn with_builtin_events() -> Self {
        Self::new()
            .with::<FoodInfoChanged>()
            .with::<DietRecordChanged>()
            .with::<UserProfileChanged>()
    }
}
