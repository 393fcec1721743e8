mod cache_event;
mod catalog;
mod domain;
mod error;
mod registry;

pub use cache_event::{CacheEvent, CacheEventType};
pub use catalog::{ChangeKind, DietRecordChanged, FoodInfoChanged, UserProfileChanged};
pub use domain::{AnyDomainEvent, DomainEvent, EventMetadata};
pub use error::{EventError, HandlerError, PublishError};
pub use registry::{EventTypeRegistry, TYPE_TAG_FIELD};
