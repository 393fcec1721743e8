//! Redis cache backend implementation.
//!
//! The shared remote tier for multi-instance deployments.

mod cache;

pub use cache::RedisCache;
