//! Cache tiers and the named two-level caches built from them.
//!
//! The remote tier is chosen at start-up: Redis when the `redis` feature
//! is enabled and configured, otherwise a process-wide [`MemoryCache`].

mod manager;
pub mod memory;
mod two_level;

#[cfg(feature = "redis")]
pub mod redis_impl;

pub use manager::CacheManager;
pub use memory::MemoryCache;
pub use two_level::TwoLevelCache;

#[cfg(feature = "redis")]
pub use redis_impl::RedisCache;
