//! Two-level caching with cross-process invalidation.
//!
//! Each process keeps a bounded in-memory tier in front of a shared
//! remote store. Mutations are applied locally at once and written back
//! in the background, and every mutation is announced on a broker so
//! other processes can drop their stale local copies.

pub mod broker;
pub mod bus;
pub mod cache;
pub mod config;
pub mod handlers;
pub mod node;
pub mod pool;

#[cfg(feature = "redis")]
mod redis_error;

pub use config::Config;
pub use node::{CacheNode, NodeError};
