use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the cache name and the entry key in remote keys.
pub const KEY_SEPARATOR: &str = "::";

/// Channel carrying every cache invalidation event.
pub const CACHE_EVENTS_CHANNEL: &str = "cache:events";

/// Channel (or stream prefix) carrying polymorphic domain events.
pub const DOMAIN_EVENTS_CHANNEL: &str = "domain-events";

/// Suffix of the per-cache Redis Set tracking every key of that cache.
const TRACKING_SUFFIX: &str = "_keys";

/// Address of a single entry: the logical cache it belongs to and its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheId {
    pub cache_name: String,
    pub key: String,
}

impl CacheId {
    pub fn new(cache_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: key.into(),
        }
    }

    /// Key used for this entry in the shared remote tier.
    pub fn remote_key(&self) -> String {
        remote_key(&self.cache_name, &self.key)
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.cache_name, KEY_SEPARATOR, self.key)
    }
}

/// Returns the remote-store key for an entry of a named cache.
pub fn remote_key(cache_name: &str, key: &str) -> String {
    format!("{}{}{}", cache_name, KEY_SEPARATOR, key)
}

/// Returns the pattern matching every remote key of a named cache.
pub fn cache_pattern(cache_name: &str) -> String {
    format!("{}{}*", cache_name, KEY_SEPARATOR)
}

/// Returns the Redis Set key for tracking the keys of a named cache.
///
/// This set contains every remote key written for the cache so that
/// clearing a cache never needs a Redis SCAN.
pub fn tracking_key(cache_name: &str) -> String {
    format!("{}{}{}", cache_name, KEY_SEPARATOR, TRACKING_SUFFIX)
}

/// Returns the stream key of one partition of a log-based channel.
pub fn partition_stream_key(channel: &str, partition: u32) -> String {
    format!("{}:{}", channel, partition)
}

/// Splits a remote key into its cache name and entry key.
///
/// Returns `None` for keys that are not namespaced by a cache name.
///
/// # Examples
///
/// ```
/// use cachesync_core::cache::split_remote_key;
///
/// assert_eq!(split_remote_key("food-info::42"), Some(("food-info", "42")));
/// assert_eq!(split_remote_key("plain-key"), None);
/// ```
pub fn split_remote_key(key: &str) -> Option<(&str, &str)> {
    let (name, rest) = key.split_once(KEY_SEPARATOR)?;
    if name.is_empty() {
        return None;
    }
    Some((name, rest))
}

/// Extracts the cache name from a pattern, if the pattern is scoped to a
/// single cache.
///
/// Returns `None` when the pattern has no cache-name prefix or when the
/// cache-name position itself contains a wildcard.
pub fn extract_cache_name_from_pattern(pattern: &str) -> Option<&str> {
    let (name, _) = split_remote_key(pattern)?;
    if name.contains('*') {
        return None;
    }
    Some(name)
}

/// Checks if a remote key is a tracking set rather than a cache entry.
pub fn is_tracking_key(key: &str) -> bool {
    matches!(split_remote_key(key), Some((_, TRACKING_SUFFIX)))
}
