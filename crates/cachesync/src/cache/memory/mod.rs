//! In-memory cache backend.
//!
//! Used as the local tier of every two-level cache, and as a process-local
//! stand-in for the remote tier.

mod cache;

pub use cache::MemoryCache;
