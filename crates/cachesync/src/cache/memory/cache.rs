//! Bounded in-process store: LRU eviction plus per-entry TTL.
//!
//! Keys written in the remote layout (`{cache_name}::{key}`) are tracked
//! per cache name, mirroring the Redis store, so `delete_pattern` on a
//! `{cache_name}::*` pattern never scans the whole store. This lets one
//! shared instance stand in for the remote tier in single-instance runs.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::RwLock;

use cachesync_core::cache::{
    extract_cache_name_from_pattern, pattern_matches, split_remote_key, Cache, Result,
};

/// A single cache entry with optional expiration.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// The local tier of every [`TwoLevelCache`](crate::cache::TwoLevelCache).
///
/// Clones share the same store. Expiry is lazy: an expired entry stays
/// until it is read or pushed out by the LRU bound.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    /// Main key-value store with LRU eviction.
    store: Arc<RwLock<LruCache<String, CacheEntry>>>,
    /// Namespaced keys by cache name.
    tracking: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    capacity: NonZeroUsize,
}

impl MemoryCache {
    /// Creates a new in-memory cache with LRU eviction.
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is 0.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).expect("max_entries must be > 0");
        Self {
            store: Arc::new(RwLock::new(LruCache::new(capacity))),
            tracking: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.store.write().await.clear();
        self.tracking.write().await.clear();
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    async fn untrack(&self, cache_name: &str, keys: &[String]) {
        let mut tracking = self.tracking.write().await;
        if let Some(tracked) = tracking.get_mut(cache_name) {
            for key in keys {
                tracked.remove(key);
            }
            if tracked.is_empty() {
                tracking.remove(cache_name);
            }
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let mut store = self.store.write().await;
            match store.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
            store.pop(key);
        }

        if let Some((cache_name, _)) = split_remote_key(key) {
            self.untrack(cache_name, &[key.to_string()]).await;
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let displaced = {
            let mut store = self.store.write().await;
            store
                .push(key.to_string(), CacheEntry::new(value.to_vec(), ttl))
                .map(|(displaced, _)| displaced)
                .filter(|displaced| displaced != key)
        };

        // The LRU victim no longer exists, so it must not be tracked.
        if let Some(victim) = displaced {
            if let Some((cache_name, _)) = split_remote_key(&victim) {
                self.untrack(cache_name, &[victim.clone()]).await;
            }
        }

        if let Some((cache_name, _)) = split_remote_key(key) {
            let mut tracking = self.tracking.write().await;
            tracking
                .entry(cache_name.to_string())
                .or_default()
                .insert(key.to_string());
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if let Some((cache_name, _)) = split_remote_key(key) {
            self.untrack(cache_name, &[key.to_string()]).await;
        }

        let mut store = self.store.write().await;
        store.pop(key);

        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let Some(cache_name) = extract_cache_name_from_pattern(pattern) else {
            // Not scoped to one cache: fall back to a full scan.
            let mut store = self.store.write().await;
            let keys_to_delete: Vec<String> = store
                .iter()
                .filter(|(key, _)| pattern_matches(pattern, key))
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys_to_delete {
                store.pop(&key);
            }
            return Ok(());
        };

        let keys_to_delete: Vec<String> = {
            let tracking = self.tracking.read().await;
            tracking
                .get(cache_name)
                .map(|keys| {
                    keys.iter()
                        .filter(|k| pattern_matches(pattern, k))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if keys_to_delete.is_empty() {
            return Ok(());
        }

        {
            let mut store = self.store.write().await;
            for key in &keys_to_delete {
                store.pop(key);
            }
        }
        self.untrack(cache_name, &keys_to_delete).await;

        Ok(())
    }
}
