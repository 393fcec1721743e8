mod error;
mod keys;
mod patterns;
mod traits;

pub use error::{CacheError, Result};
pub use keys::{
    cache_pattern, extract_cache_name_from_pattern, is_tracking_key, partition_stream_key,
    remote_key, split_remote_key, tracking_key, CacheId, CACHE_EVENTS_CHANNEL,
    DOMAIN_EVENTS_CHANNEL, KEY_SEPARATOR,
};
pub use patterns::pattern_matches;
pub use traits::Cache;
