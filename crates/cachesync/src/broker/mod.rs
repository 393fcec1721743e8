//! Event broker backends.
//!
//! - [`MemoryBroker`]: process-local fan-out, for tests and single-instance runs
//! - [`RedisPubSubBroker`]: at-most-once fan-out over Redis pub/sub (`redis` feature)
//! - [`RedisStreamBroker`]: partitioned, at-least-once delivery over Redis Streams (`redis` feature)

mod memory;

#[cfg(feature = "redis")]
mod redis_pubsub;
#[cfg(feature = "redis")]
mod redis_stream;

pub use memory::MemoryBroker;

#[cfg(feature = "redis")]
pub use redis_pubsub::RedisPubSubBroker;
#[cfg(feature = "redis")]
pub use redis_stream::{partition_for, RedisStreamBroker, StreamOptions};
