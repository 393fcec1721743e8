//! Redis Streams broker.
//!
//! Durable, partitioned, at-least-once delivery through consumer groups.
//! A channel maps to `partitions` streams named `{channel}:{n}`; keyed
//! publishes always land on the same partition, so events sharing a key
//! are handled in publish order.
//!
//! Each partition is consumed by its own loop on a dedicated connection.
//! Entries are handled one at a time and acknowledged only after the
//! handler returns or panics. On start, and after every reconnect, a consumer first
//! re-reads the entries it fetched but never acknowledged.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use cachesync_core::broker::{
    BrokerError, BrokerMessage, EventBroker, MessageHandler, Result, Subscription,
};
use cachesync_core::cache::partition_stream_key;

use crate::pool::TaskPool;
use crate::redis_error::map_broker_error;

/// Entry field holding the payload.
const PAYLOAD_FIELD: &str = "payload";

/// Entries fetched per read.
const READ_BATCH: usize = 64;

/// How long one blocking read waits for new entries.
const BLOCK_MS: usize = 5_000;

/// Cap for the reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Read cursor for this consumer's pending entries.
const PENDING: &str = "0";

/// Read cursor for entries never delivered to the group.
const NEW: &str = ">";

/// Settings for the stream broker.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Number of streams per channel.
    pub partitions: u32,
    /// Approximate maximum length of each stream.
    pub max_len: usize,
    /// Consumer group; every process of one service shares it.
    pub group: String,
    /// Consumer name; must be stable across restarts for redelivery.
    pub consumer: String,
    /// Bound for every publish and setup command.
    pub timeout: Duration,
}

pub struct RedisStreamBroker {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    options: StreamOptions,
    dispatch: TaskPool,
}

/// Partition for a key, stable across processes and restarts.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash % partitions.max(1)
}

impl RedisStreamBroker {
    pub async fn new(url: &str, options: StreamOptions, dispatch: TaskPool) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| map_broker_error(e, BrokerError::ConnectionFailed))?;
        let conn = tokio::time::timeout(
            options.timeout,
            redis::aio::ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| BrokerError::Timeout(options.timeout.as_millis() as u64))?
        .map_err(|e| map_broker_error(e, BrokerError::ConnectionFailed))?;

        Ok(Self {
            client,
            conn,
            options: StreamOptions {
                partitions: options.partitions.max(1),
                ..options
            },
            dispatch,
        })
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn timeout_error(&self) -> BrokerError {
        BrokerError::Timeout(self.options.timeout.as_millis() as u64)
    }

    async fn append(&self, stream: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let fields = [(PAYLOAD_FIELD, payload)];
        let add = conn.xadd_maxlen::<_, _, _, _, ()>(
            stream,
            StreamMaxlen::Approx(self.options.max_len),
            "*",
            &fields,
        );
        tokio::time::timeout(self.options.timeout, add)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| map_broker_error(e, BrokerError::PublishFailed))
    }

    /// Creates the consumer group on a stream, creating the stream too.
    async fn ensure_group(&self, stream: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let create =
            conn.xgroup_create_mkstream::<_, _, _, ()>(stream, &self.options.group, "$");
        match tokio::time::timeout(self.options.timeout, create).await {
            Err(_) => Err(self.timeout_error()),
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.code() == Some("BUSYGROUP") => Ok(()),
            Ok(Err(e)) => Err(map_broker_error(e, BrokerError::SubscribeFailed)),
        }
    }
}

#[async_trait]
impl EventBroker for RedisStreamBroker {
    /// Unkeyed payloads go to partition 0.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.append(&partition_stream_key(channel, 0), payload).await
    }

    async fn publish_keyed(&self, channel: &str, partition_key: &str, payload: &[u8]) -> Result<()> {
        let partition = partition_for(partition_key, self.options.partitions);
        self.append(&partition_stream_key(channel, partition), payload)
            .await
    }

    /// Subscribes to every partition of `channel_pattern`.
    ///
    /// Streams have no pattern subscription, so globs are rejected.
    async fn subscribe(
        &self,
        channel_pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        if channel_pattern.contains('*') {
            return Err(BrokerError::SubscribeFailed(format!(
                "stream channels cannot be patterns: {}",
                channel_pattern
            )));
        }

        let mut tasks: Vec<tokio::task::JoinHandle<()>> =
            Vec::with_capacity(self.options.partitions as usize);
        for partition in 0..self.options.partitions {
            let stream = partition_stream_key(channel_pattern, partition);
            if let Err(e) = self.ensure_group(&stream).await {
                for task in &tasks {
                    task.abort();
                }
                return Err(e);
            }

            tasks.push(tokio::spawn(consume_partition(
                self.client.clone(),
                stream,
                self.options.clone(),
                Arc::clone(&handler),
                self.dispatch.clone(),
            )));
        }

        tracing::info!(
            channel = %channel_pattern,
            group = %self.options.group,
            consumer = %self.options.consumer,
            partitions = self.options.partitions,
            "Subscribed to stream partitions"
        );
        Ok(Subscription::new(channel_pattern, tasks))
    }
}

/// Consumes one partition forever, reconnecting with exponential backoff.
async fn consume_partition(
    client: redis::Client,
    stream: String,
    options: StreamOptions,
    handler: Arc<dyn MessageHandler>,
    dispatch: TaskPool,
) {
    let mut backoff = Duration::from_secs(1);

    loop {
        let result = match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                backoff = Duration::from_secs(1);
                consume(&mut conn, &stream, &options, &handler, &dispatch).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::error!(
                stream = %stream,
                error = %e,
                backoff_secs = backoff.as_secs(),
                "Stream consumer error, reconnecting..."
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

async fn consume(
    conn: &mut redis::aio::MultiplexedConnection,
    stream: &str,
    options: &StreamOptions,
    handler: &Arc<dyn MessageHandler>,
    dispatch: &TaskPool,
) -> redis::RedisResult<()> {
    let mut cursor = PENDING;

    loop {
        let read = StreamReadOptions::default()
            .group(&options.group, &options.consumer)
            .count(READ_BATCH)
            .block(BLOCK_MS);
        let reply: Option<StreamReadReply> = conn.xread_options(&[stream], &[cursor], &read).await?;

        let entries: Vec<StreamId> = reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();

        if entries.is_empty() {
            if cursor == PENDING {
                tracing::debug!(stream = %stream, "Pending entries drained");
                cursor = NEW;
            }
            continue;
        }

        for entry in entries {
            match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
                Some(payload) => {
                    let message = BrokerMessage::new(stream, payload);
                    let delivery = AssertUnwindSafe(handler.on_message(message)).catch_unwind();
                    // A panicking handler still gets the entry acknowledged.
                    if let Some(Err(panic)) = dispatch.run(delivery).await {
                        tracing::error!(
                            stream = %stream,
                            id = %entry.id,
                            panic = %crate::bus::panic_message(&*panic),
                            "Stream handler panicked"
                        );
                    }
                }
                None => {
                    tracing::warn!(stream = %stream, id = %entry.id, "Skipping stream entry without payload");
                }
            }
            conn.xack::<_, _, _, ()>(stream, &options.group, &[&entry.id])
                .await?;
        }
    }
}
