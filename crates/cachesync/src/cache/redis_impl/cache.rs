//! Redis cache implementation.
//!
//! Uses set-based key tracking for pattern deletion without SCAN. Every
//! key written in the `{cache_name}::{key}` layout is also added to the
//! `{cache_name}::_keys` Set, so clearing one named cache touches only
//! that cache's keys.
//!
//! The multi-command operations are not atomic. A crash between the DEL
//! and the SREM leaves a stale member in the tracking set, and a failed
//! SET after SADD leaves a member with no value behind it. Both are
//! harmless: DEL and SREM on missing keys are no-ops, and the tracking
//! set expires together with the newest key it references.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use cachesync_core::cache::{
    cache_pattern, extract_cache_name_from_pattern, pattern_matches, split_remote_key,
    tracking_key, Cache, CacheError, Result,
};

use crate::redis_error::map_redis_error;

/// Redis cache backend using connection manager for pooling.
///
/// Every command is bounded by `op_timeout`; expiry of the bound surfaces
/// as [`CacheError::Timeout`].
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    op_timeout: Duration,
}

impl RedisCache {
    /// Creates a new Redis cache connection.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be
    /// established, or `CacheError::Timeout` if it takes longer than
    /// `op_timeout`.
    pub async fn new(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = with_timeout(op_timeout, redis::aio::ConnectionManager::new(client)).await?;
        Ok(Self { conn, op_timeout })
    }

    async fn timed<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        with_timeout(self.op_timeout, op).await
    }
}

async fn with_timeout<T, F>(limit: Duration, op: F) -> Result<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(map_redis_error),
        Err(_) => Err(CacheError::Timeout(limit.as_millis() as u64)),
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.timed(conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.map(|duration| duration.as_secs().max(1));

        match seconds {
            Some(seconds) => {
                self.timed(conn.set_ex::<_, _, ()>(key, value, seconds))
                    .await?
            }
            None => self.timed(conn.set::<_, _, ()>(key, value)).await?,
        }

        if let Some((cache_name, _)) = split_remote_key(key) {
            let tracking = tracking_key(cache_name);
            self.timed(conn.sadd::<_, _, ()>(&tracking, key)).await?;
            if let Some(seconds) = seconds {
                self.timed(conn.expire::<_, ()>(&tracking, seconds as i64))
                    .await?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();

        if let Some((cache_name, _)) = split_remote_key(key) {
            let tracking = tracking_key(cache_name);
            self.timed(conn.srem::<_, _, ()>(&tracking, key)).await?;
        }

        self.timed(conn.del::<_, ()>(key)).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let Some(cache_name) = extract_cache_name_from_pattern(pattern) else {
            // Only namespaced keys are tracked.
            tracing::debug!(pattern = %pattern, "Ignoring unscoped pattern delete");
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let tracking = tracking_key(cache_name);

        let tracked_keys: Vec<String> = self.timed(conn.smembers(&tracking)).await?;
        let keys_to_delete: Vec<&String> = tracked_keys
            .iter()
            .filter(|k| pattern_matches(pattern, k))
            .collect();

        if !keys_to_delete.is_empty() {
            self.timed(conn.del::<_, ()>(&keys_to_delete)).await?;
            self.timed(conn.srem::<_, _, ()>(&tracking, &keys_to_delete))
                .await?;
        }

        if pattern == cache_pattern(cache_name) {
            self.timed(conn.del::<_, ()>(&tracking)).await?;
        }

        Ok(())
    }
}
