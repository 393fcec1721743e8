//! Local + remote cache for one named cache.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use cachesync_core::cache::{cache_pattern, remote_key, Cache, CacheError, Result};

use super::MemoryCache;
use crate::bus::CacheEventBus;
use crate::pool::TaskPool;

/// A named cache with an in-process tier in front of a shared remote tier.
///
/// ## Read path
///
/// 1. Local hit: returned immediately
/// 2. Remote hit: copied into the local tier, then returned
/// 3. Double miss: the loader runs and its value is `put`
///
/// Remote errors on the read path count as misses.
///
/// ## Write path
///
/// Mutations apply to the local tier before returning. The remote write
/// (and the cache event, when a bus is attached) runs on the write-back
/// pool; failures there are logged and never reach the caller. Write-backs
/// for one key run in call order, and a clear runs after every earlier
/// write-back of the pool.
#[derive(Clone)]
pub struct TwoLevelCache {
    name: String,
    local: MemoryCache,
    remote: Arc<dyn Cache>,
    ttl: Duration,
    writeback: TaskPool,
    events: Option<Arc<CacheEventBus>>,
}

impl TwoLevelCache {
    /// Creates a cache holding at most `max_entries` locally.
    ///
    /// # Panics
    ///
    /// Panics if `max_entries` is 0.
    pub fn new(
        name: impl Into<String>,
        ttl: Duration,
        max_entries: usize,
        remote: Arc<dyn Cache>,
        writeback: TaskPool,
    ) -> Self {
        Self {
            name: name.into(),
            local: MemoryCache::new(max_entries),
            remote,
            ttl,
            writeback,
            events: None,
        }
    }

    /// Publishes PUT/EVICT/CLEAR events for every mutation.
    pub fn with_event_bus(mut self, events: Arc<CacheEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The local tier.
    pub fn local(&self) -> &MemoryCache {
        &self.local
    }

    /// Returns the cached value, loading and caching it on a double miss.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LoadFailed` if the loader fails; nothing is
    /// cached in that case.
    pub async fn get<T, F, Fut, E>(&self, key: &str, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        if let Some(value) = self.get_if_present(key).await {
            return Ok(value);
        }

        tracing::trace!(cache = %self.name, key = %key, "cache miss, loading");
        let value = loader()
            .await
            .map_err(|e| CacheError::LoadFailed(e.to_string()))?;

        if let Err(e) = self.put(key, &value).await {
            tracing::warn!(cache = %self.name, key = %key, error = %e, "Failed to cache loaded value");
        }

        Ok(value)
    }

    /// Local then remote lookup, without loading.
    pub async fn get_if_present<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Ok(Some(bytes)) = self.local.get(key).await {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    tracing::trace!(cache = %self.name, key = %key, "cache hit (local)");
                    return Some(value);
                }
                Err(e) => {
                    tracing::warn!(cache = %self.name, key = %key, error = %e, "Dropping undecodable local entry");
                    let _ = self.local.delete(key).await;
                }
            }
        }

        let bytes = match self.remote.get(&remote_key(&self.name, key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(cache = %self.name, key = %key, error = %e, "Remote get failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                tracing::trace!(cache = %self.name, key = %key, "cache hit (remote)");
                let _ = self.local.set(key, &bytes, Some(self.ttl)).await;
                Some(value)
            }
            Err(e) => {
                tracing::warn!(cache = %self.name, key = %key, error = %e, "Ignoring undecodable remote entry");
                None
            }
        }
    }

    /// Stores a value locally and schedules the remote write.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.local.set(key, &bytes, Some(self.ttl)).await?;

        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let name = self.name.clone();
        let key = key.to_string();
        let ttl = self.ttl;
        let target = remote_key(&name, &key);

        self.writeback.spawn_ordered(&remote_key(&name, &key), async move {
            match remote.set(&target, &bytes, Some(ttl)).await {
                Ok(()) => tracing::debug!(cache = %name, key = %key, "cache set (local+remote)"),
                Err(e) => tracing::warn!(cache = %name, key = %key, error = %e, "Remote set failed"),
            }
            if let Some(events) = events {
                if let Err(e) = events.publish_put(&name, &key).await {
                    tracing::warn!(cache = %name, key = %key, error = %e, "Failed to publish PUT");
                }
            }
        });

        Ok(())
    }

    /// Stores `value` unless either tier already holds the key.
    ///
    /// Returns the existing value untouched when there is one.
    pub async fn put_if_absent<T>(&self, key: &str, value: &T) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(existing) = self.get_if_present(key).await {
            return Ok(Some(existing));
        }
        self.put(key, value).await?;
        Ok(None)
    }

    /// Removes a key locally and schedules the remote delete.
    pub async fn evict(&self, key: &str) -> Result<()> {
        self.local.delete(key).await?;

        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let name = self.name.clone();
        let key = key.to_string();
        let target = remote_key(&name, &key);

        self.writeback.spawn_ordered(&remote_key(&name, &key), async move {
            match remote.delete(&target).await {
                Ok(()) => tracing::debug!(cache = %name, key = %key, "cache evict (local+remote)"),
                Err(e) => tracing::warn!(cache = %name, key = %key, error = %e, "Remote delete failed"),
            }
            if let Some(events) = events {
                if let Err(e) = events.publish_evict(&name, &key).await {
                    tracing::warn!(cache = %name, key = %key, error = %e, "Failed to publish EVICT");
                }
            }
        });

        Ok(())
    }

    /// Empties the cache locally and schedules the remote clear.
    pub async fn clear(&self) -> Result<()> {
        self.local.clear().await;

        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let name = self.name.clone();

        self.writeback.spawn_barrier(async move {
            match remote.delete_pattern(&cache_pattern(&name)).await {
                Ok(()) => tracing::debug!(cache = %name, "cache clear (local+remote)"),
                Err(e) => tracing::warn!(cache = %name, error = %e, "Remote clear failed"),
            }
            if let Some(events) = events {
                if let Err(e) = events.publish_clear(&name).await {
                    tracing::warn!(cache = %name, error = %e, "Failed to publish CLEAR");
                }
            }
        });

        Ok(())
    }

    /// Removes a key from the local tier only.
    ///
    /// Used when reacting to another process's event: that process has
    /// already updated the remote tier.
    pub async fn evict_local(&self, key: &str) -> Result<()> {
        tracing::trace!(cache = %self.name, key = %key, "local evict");
        self.local.delete(key).await
    }

    /// Empties the local tier only.
    pub async fn clear_local(&self) -> Result<()> {
        tracing::trace!(cache = %self.name, "local clear");
        self.local.clear().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::bus::{CacheEventHandler, CacheEventListener};
    use async_trait::async_trait;
    use cachesync_core::events::HandlerError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    fn alice() -> User {
        User {
            name: "Alice".to_string(),
        }
    }

    fn cache_with(remote: Arc<dyn Cache>, pool: &TaskPool) -> TwoLevelCache {
        TwoLevelCache::new("user", Duration::from_secs(60), 100, remote, pool.clone())
    }

    /// Remote that fails every call.
    struct DownRemote;

    #[async_trait]
    impl Cache for DownRemote {
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
            Err(CacheError::ConnectionFailed("down".to_string()))
        }

        async fn set(&self, _: &str, _: &[u8], _: Option<Duration>) -> Result<()> {
            Err(CacheError::ConnectionFailed("down".to_string()))
        }

        async fn delete(&self, _: &str) -> Result<()> {
            Err(CacheError::Timeout(500))
        }

        async fn delete_pattern(&self, _: &str) -> Result<()> {
            Err(CacheError::Timeout(500))
        }
    }

    #[tokio::test]
    async fn test_put_then_get_same_process() {
        let pool = TaskPool::new("writeback", 4);
        let cache = cache_with(Arc::new(MemoryCache::new(100)), &pool);

        cache.put("user:1", &alice()).await.unwrap();

        let value: User = cache
            .get("user:1", || async { Err::<User, _>("loader must not run") })
            .await
            .unwrap();
        assert_eq!(value, alice());
    }

    #[tokio::test]
    async fn test_double_miss_loads_and_caches() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        let cache = cache_with(remote.clone(), &pool);
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: User = cache
                .get("user:1", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(alice())
                })
                .await
                .unwrap();
            assert_eq!(value, alice());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        pool.drain().await;
        assert!(remote.get("user::user:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_loader_failure_leaves_cache_unchanged() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        let cache = cache_with(remote.clone(), &pool);

        let err = cache
            .get::<User, _, _, _>("user:1", || async { Err("database unavailable") })
            .await
            .unwrap_err();

        assert_eq!(err, CacheError::LoadFailed("database unavailable".to_string()));
        pool.drain().await;
        assert!(cache.local().is_empty().await);
        assert!(remote.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_hides_previous_value() {
        let pool = TaskPool::new("writeback", 4);
        let cache = cache_with(Arc::new(MemoryCache::new(100)), &pool);

        cache.put("user:1", &alice()).await.unwrap();
        pool.drain().await;
        cache.evict("user:1").await.unwrap();

        let value: User = cache
            .get("user:1", || async {
                Ok::<_, String>(User {
                    name: "Bob".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(value.name, "Bob");
    }

    /// Shared remote whose writes take a while to land.
    struct SlowSetRemote {
        inner: MemoryCache,
        delay: Duration,
    }

    #[async_trait]
    impl Cache for SlowSetRemote {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn delete_pattern(&self, pattern: &str) -> Result<()> {
            self.inner.delete_pattern(pattern).await
        }
    }

    fn slow_remote() -> Arc<dyn Cache> {
        Arc::new(SlowSetRemote {
            inner: MemoryCache::new(100),
            delay: Duration::from_millis(50),
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_evict_right_after_put_wins_remotely() {
        let pool = TaskPool::new("writeback", 4);
        let cache = cache_with(slow_remote(), &pool);

        cache.put("user:1", &alice()).await.unwrap();
        cache.evict("user:1").await.unwrap();
        pool.drain().await;

        assert_eq!(cache.get_if_present::<User>("user:1").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_right_after_puts_wins_remotely() {
        let pool = TaskPool::new("writeback", 4);
        let cache = cache_with(slow_remote(), &pool);

        cache.put("user:1", &alice()).await.unwrap();
        cache.put("user:2", &alice()).await.unwrap();
        cache.clear().await.unwrap();
        pool.drain().await;

        assert_eq!(cache.get_if_present::<User>("user:1").await, None);
        assert_eq!(cache.get_if_present::<User>("user:2").await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_put_wins_remotely() {
        let pool = TaskPool::new("writeback", 4);
        let remote = slow_remote();
        let writer = cache_with(Arc::clone(&remote), &pool);
        let reader = cache_with(remote, &pool);
        let bob = User {
            name: "Bob".to_string(),
        };

        writer.put("user:1", &alice()).await.unwrap();
        writer.put("user:1", &bob).await.unwrap();
        pool.drain().await;

        assert_eq!(reader.get_if_present::<User>("user:1").await, Some(bob));
    }

    #[tokio::test]
    async fn test_remote_hit_repopulates_local() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        remote
            .set("user::user:1", br#"{"name":"Alice"}"#, None)
            .await
            .unwrap();
        let cache = cache_with(remote, &pool);

        assert!(cache.local().is_empty().await);
        let value: Option<User> = cache.get_if_present("user:1").await;
        assert_eq!(value, Some(alice()));
        assert!(cache.local().get("user:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remote_outage_is_a_miss() {
        let pool = TaskPool::new("writeback", 4);
        let cache = cache_with(Arc::new(DownRemote), &pool);

        let value: User = cache
            .get("user:1", || async { Ok::<_, String>(alice()) })
            .await
            .unwrap();
        assert_eq!(value, alice());

        // Write-back failures are swallowed.
        cache.evict("user:1").await.unwrap();
        cache.clear().await.unwrap();
        pool.drain().await;
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        remote.set("user::user:1", b"not json", None).await.unwrap();
        let cache = cache_with(remote, &pool);

        let value: Option<User> = cache.get_if_present("user:1").await;
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_existing() {
        let pool = TaskPool::new("writeback", 4);
        let cache = cache_with(Arc::new(MemoryCache::new(100)), &pool);
        let bob = User {
            name: "Bob".to_string(),
        };

        assert_eq!(cache.put_if_absent("user:1", &alice()).await.unwrap(), None);
        assert_eq!(
            cache.put_if_absent("user:1", &bob).await.unwrap(),
            Some(alice())
        );

        let value: Option<User> = cache.get_if_present("user:1").await;
        assert_eq!(value, Some(alice()));
    }

    #[tokio::test]
    async fn test_put_if_absent_sees_remote() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        let p1 = cache_with(remote.clone(), &pool);
        let p2 = cache_with(remote, &pool);

        p1.put("user:1", &alice()).await.unwrap();
        pool.drain().await;

        let bob = User {
            name: "Bob".to_string(),
        };
        assert_eq!(p2.put_if_absent("user:1", &bob).await.unwrap(), Some(alice()));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        let cache = cache_with(remote.clone(), &pool);
        remote.set("food::1", b"1", None).await.unwrap();

        cache.put("user:1", &alice()).await.unwrap();
        cache.put("user:2", &alice()).await.unwrap();
        pool.drain().await;

        cache.clear().await.unwrap();
        pool.drain().await;
        cache.clear().await.unwrap();
        pool.drain().await;

        assert!(cache.local().is_empty().await);
        assert!(cache.get_if_present::<User>("user:1").await.is_none());
        // Other caches sharing the remote are untouched.
        assert!(remote.get("food::1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_only_mutations_keep_remote() {
        let pool = TaskPool::new("writeback", 4);
        let remote = Arc::new(MemoryCache::new(100));
        let cache = cache_with(remote.clone(), &pool);

        cache.put("user:1", &alice()).await.unwrap();
        pool.drain().await;

        cache.evict_local("user:1").await.unwrap();
        assert!(cache.local().get("user:1").await.unwrap().is_none());
        assert!(remote.get("user::user:1").await.unwrap().is_some());

        cache.clear_local().await.unwrap();
        assert!(remote.get("user::user:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_other_process_observes_put_through_remote() {
        let pool = TaskPool::new("writeback", 4);
        let remote: Arc<dyn Cache> = Arc::new(MemoryCache::new(100));
        let p1 = cache_with(Arc::clone(&remote), &pool);
        let p2 = cache_with(remote, &pool);

        p1.put("user:1", &alice()).await.unwrap();

        let observed = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(user) = p2.get_if_present::<User>("user:1").await {
                    return user;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(observed, alice());
    }

    /// Evicts the local entry of the watched cache.
    struct EvictLocal {
        cache: TwoLevelCache,
        evictions: AtomicUsize,
    }

    #[async_trait]
    impl CacheEventHandler for EvictLocal {
        async fn handle_evict(&self, cache_name: &str, cache_key: &str) -> std::result::Result<(), HandlerError> {
            if cache_name == self.cache.name() {
                self.cache.evict_local(cache_key).await?;
                self.evictions.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn handle_clear(&self, cache_name: &str) -> std::result::Result<(), HandlerError> {
            if cache_name == self.cache.name() {
                self.cache.clear_local().await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_evict_event_reaches_other_process() {
        let dispatch = TaskPool::new("dispatch", 4);
        let broker = Arc::new(MemoryBroker::new(dispatch));
        let remote: Arc<dyn Cache> = Arc::new(MemoryCache::new(100));

        let p1_pool = TaskPool::new("p1-writeback", 4);
        let p1_bus = Arc::new(CacheEventBus::new(broker.clone(), "food-service"));
        let p1 = TwoLevelCache::new("food", Duration::from_secs(60), 100, Arc::clone(&remote), p1_pool.clone())
            .with_event_bus(p1_bus);

        let p2_pool = TaskPool::new("p2-writeback", 4);
        let p2 = TwoLevelCache::new("food", Duration::from_secs(60), 100, remote, p2_pool);
        let p2_bus = CacheEventBus::new(broker.clone(), "diet-service");
        let listener = Arc::new(
            CacheEventListener::new(
                "diet-service",
                EvictLocal {
                    cache: p2.clone(),
                    evictions: AtomicUsize::new(0),
                },
            )
            .with_interest(["food"]),
        );
        let _subscription = p2_bus.listen(Arc::clone(&listener)).await.unwrap();

        let evictions = || listener.handler().evictions.load(Ordering::SeqCst);
        let wait_for_evictions = |expected: usize| async move {
            tokio::time::timeout(Duration::from_secs(1), async {
                while evictions() < expected {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
        };

        // PUT from P1 evicts P2's local copy.
        p1.put("42", &"apple").await.unwrap();
        wait_for_evictions(1).await;

        let cached: Option<String> = p2.get_if_present("42").await;
        assert_eq!(cached.as_deref(), Some("apple"));
        assert!(p2.local().get("42").await.unwrap().is_some());

        // EVICT from P1 evicts it again.
        p1.evict("42").await.unwrap();
        wait_for_evictions(2).await;

        assert!(p2.local().get("42").await.unwrap().is_none());
        p1_pool.drain().await;
        assert!(p2.get_if_present::<String>("42").await.is_none());
    }

    #[tokio::test]
    async fn test_own_events_are_ignored() {
        let dispatch = TaskPool::new("dispatch", 4);
        let broker = Arc::new(MemoryBroker::new(dispatch));
        let pool = TaskPool::new("writeback", 4);
        let bus = Arc::new(CacheEventBus::new(broker, "food-service"));

        let cache = cache_with(Arc::new(MemoryCache::new(100)), &pool).with_event_bus(Arc::clone(&bus));
        let listener = Arc::new(CacheEventListener::new(
            "food-service",
            EvictLocal {
                cache: cache.clone(),
                evictions: AtomicUsize::new(0),
            },
        ));
        let _subscription = bus.listen(Arc::clone(&listener)).await.unwrap();

        cache.put("user:1", &alice()).await.unwrap();
        pool.drain().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(listener.handler().evictions.load(Ordering::SeqCst), 0);
        assert!(cache.local().get("user:1").await.unwrap().is_some());
    }
}
