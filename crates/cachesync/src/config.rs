use std::{collections::HashMap, env, fmt, str::FromStr, time::Duration};

use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown broker backend '{0}' (expected memory, pubsub or stream)")]
    UnknownBackend(String),

    #[error("Invalid cache spec '{0}' (expected name=ttl_secs:max_entries)")]
    InvalidCacheSpec(String),

    #[error("Invalid mapping '{0}' (expected name=a|b)")]
    InvalidMapping(String),
}

/// Transport used for cache and domain events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    /// In-process broadcast; events never leave the process.
    Memory,
    /// Redis pub/sub for both buses.
    PubSub,
    /// Redis Streams for domain events, pub/sub for cache events.
    Stream,
}

impl FromStr for BrokerBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "pubsub" => Ok(Self::PubSub),
            "stream" | "streams" => Ok(Self::Stream),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BrokerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::PubSub => "pubsub",
            Self::Stream => "stream",
        };
        f.write_str(name)
    }
}

/// Local TTL and size bound of one named cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSpec {
    pub ttl: Duration,
    pub max_entries: usize,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity stamped on published cache events (default: "cachesync")
    pub service_name: String,
    /// Redis connection URL (default: "redis://localhost:6379")
    pub redis_url: String,
    /// Event transport (default: memory)
    pub broker_backend: BrokerBackend,
    /// Default cache TTL in seconds (default: 300)
    pub cache_ttl_seconds: u64,
    /// Default local cache size (default: 10,000)
    pub cache_max_entries: usize,
    /// Per-cache overrides
    pub cache_specs: HashMap<String, CacheSpec>,
    /// Write-back pool size (default: 16)
    pub writeback_workers: usize,
    /// Inbound dispatch pool size (default: 16)
    pub dispatch_workers: usize,
    /// Remote store operation timeout (default: 500)
    pub remote_timeout_ms: u64,
    /// Broker publish timeout (default: 1000)
    pub publish_timeout_ms: u64,
    /// Streams per channel on the stream backend (default: 4)
    pub stream_partitions: u32,
    /// Approximate stream length cap (default: 10,000)
    pub stream_max_len: usize,
    /// Stream consumer group (default: service name)
    pub consumer_group: String,
    /// Stream consumer name (default: service name)
    pub consumer_name: String,
    /// Identity of this process among instances of the service (default: random)
    pub instance_id: String,
    /// Source cache to the caches cleared locally when it changes
    pub cache_dependencies: HashMap<String, Vec<String>>,
    /// Domain event type to the caches cleared locally when it arrives
    pub domain_invalidations: HashMap<String, Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SERVICE_NAME` - Service identity (default: "cachesync")
    /// - `REDIS_URL` - Redis connection URL (default: "redis://localhost:6379")
    /// - `BROKER_BACKEND` - `memory`, `pubsub` or `stream` (default: memory)
    /// - `CACHE_TTL_SECONDS` - Default cache TTL in seconds (default: 300)
    /// - `CACHE_MAX_ENTRIES` - Default local cache size (default: 10,000)
    /// - `CACHE_SPECS` - `name=ttl_secs:max_entries,...`
    /// - `WRITEBACK_WORKERS` / `DISPATCH_WORKERS` - Pool sizes (default: 16)
    /// - `REMOTE_TIMEOUT_MS` - Remote store timeout (default: 500)
    /// - `PUBLISH_TIMEOUT_MS` - Broker publish timeout (default: 1000)
    /// - `STREAM_PARTITIONS` - Streams per channel (default: 4)
    /// - `STREAM_MAX_LEN` - Stream length cap (default: 10,000)
    /// - `CONSUMER_GROUP` / `CONSUMER_NAME` - Stream consumer identity
    /// - `INSTANCE_ID` - Stable per-instance identity (default: random UUID)
    /// - `CACHE_DEPENDENCIES` - `source=dep1|dep2,...`
    /// - `DOMAIN_INVALIDATIONS` - `EventType=cache1|cache2,...`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |key: &str, default| -> u64 {
            var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let service_name = var("SERVICE_NAME").unwrap_or_else(|| "cachesync".to_string());
        let broker_backend = match var("BROKER_BACKEND") {
            Some(value) => value.parse()?,
            None => BrokerBackend::Memory,
        };

        Ok(Self {
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            broker_backend,
            cache_ttl_seconds: number("CACHE_TTL_SECONDS", 300),
            cache_max_entries: number("CACHE_MAX_ENTRIES", 10_000) as usize,
            cache_specs: parse_cache_specs(&var("CACHE_SPECS").unwrap_or_default())?,
            writeback_workers: number("WRITEBACK_WORKERS", 16) as usize,
            dispatch_workers: number("DISPATCH_WORKERS", 16) as usize,
            remote_timeout_ms: number("REMOTE_TIMEOUT_MS", 500),
            publish_timeout_ms: number("PUBLISH_TIMEOUT_MS", 1_000),
            stream_partitions: number("STREAM_PARTITIONS", 4) as u32,
            stream_max_len: number("STREAM_MAX_LEN", 10_000) as usize,
            consumer_group: var("CONSUMER_GROUP").unwrap_or_else(|| service_name.clone()),
            consumer_name: var("CONSUMER_NAME").unwrap_or_else(|| service_name.clone()),
            instance_id: var("INSTANCE_ID")
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            cache_dependencies: parse_mapping(&var("CACHE_DEPENDENCIES").unwrap_or_default())?,
            domain_invalidations: parse_mapping(&var("DOMAIN_INVALIDATIONS").unwrap_or_default())?,
            service_name,
        })
    }

    /// Get cache TTL as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Spec applied to caches without an override.
    pub fn default_cache_spec(&self) -> CacheSpec {
        CacheSpec {
            ttl: self.cache_ttl(),
            max_entries: self.cache_max_entries.max(1),
        }
    }

    /// Stream consumer group of this instance's local invalidation.
    ///
    /// A consumer group hands each entry to one member, so the group must
    /// be unique per instance for every instance to drop its local copies.
    pub fn invalidation_group(&self) -> String {
        format!("{}:{}", self.consumer_group, self.instance_id)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Parses `name=ttl_secs:max_entries` pairs separated by commas.
pub fn parse_cache_specs(input: &str) -> Result<HashMap<String, CacheSpec>, ConfigError> {
    let mut specs = HashMap::new();
    for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let invalid = || ConfigError::InvalidCacheSpec(item.to_string());

        let (name, spec) = item.split_once('=').ok_or_else(invalid)?;
        let (ttl, max_entries) = spec.split_once(':').ok_or_else(invalid)?;
        let ttl: u64 = ttl.trim().parse().map_err(|_| invalid())?;
        let max_entries: usize = max_entries.trim().parse().map_err(|_| invalid())?;
        if name.trim().is_empty() || max_entries == 0 {
            return Err(invalid());
        }

        specs.insert(
            name.trim().to_string(),
            CacheSpec {
                ttl: Duration::from_secs(ttl),
                max_entries,
            },
        );
    }
    Ok(specs)
}

/// Parses `name=a|b` pairs separated by commas.
pub fn parse_mapping(input: &str) -> Result<HashMap<String, Vec<String>>, ConfigError> {
    let mut mapping: HashMap<String, Vec<String>> = HashMap::new();
    for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, targets) = item
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidMapping(item.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidMapping(item.to_string()));
        }

        mapping.entry(name.to_string()).or_default().extend(
            targets
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
    }
    Ok(mapping)
}
