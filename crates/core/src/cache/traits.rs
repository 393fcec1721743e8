use std::time::Duration;

use async_trait::async_trait;

use super::Result;

/// Trait for byte-level cache stores.
///
/// Implemented by both tiers of the two-level cache: the bounded
/// in-process store and the shared remote store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Gets a value from the cache by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Sets a value in the cache with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Deletes a value from the cache by key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Deletes all values matching a pattern (e.g., "food-info::*").
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;
}
