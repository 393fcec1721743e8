//! Core types and traits for cachesync.
//!
//! Everything here is transport-agnostic: cache store and broker traits,
//! key layout, and the cache/domain event types with their wire formats.
//! Concrete backends live in the `cachesync` crate.

pub mod broker;
pub mod cache;
pub mod events;
