//! Redis pub/sub broker.
//!
//! Lowest-latency fan-out: delivery is at-most-once and only reaches
//! processes subscribed at publish time. Subscriptions use PSUBSCRIBE so
//! the channel argument may be a glob.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::oneshot;

use cachesync_core::broker::{
    BrokerError, BrokerMessage, EventBroker, MessageHandler, Result, Subscription,
};

use crate::pool::TaskPool;
use crate::redis_error::map_broker_error;

/// Cap for the reconnect backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

pub struct RedisPubSubBroker {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    timeout: Duration,
    dispatch: TaskPool,
}

impl RedisPubSubBroker {
    /// Connects to Redis.
    ///
    /// `timeout` bounds every publish and the initial subscribe handshake.
    pub async fn new(url: &str, timeout: Duration, dispatch: TaskPool) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| map_broker_error(e, BrokerError::ConnectionFailed))?;
        let conn = tokio::time::timeout(timeout, redis::aio::ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BrokerError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| map_broker_error(e, BrokerError::ConnectionFailed))?;

        Ok(Self {
            client,
            conn,
            timeout,
            dispatch,
        })
    }
}

#[async_trait]
impl EventBroker for RedisPubSubBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(self.timeout, conn.publish::<_, _, ()>(channel, payload))
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|e| map_broker_error(e, BrokerError::PublishFailed))
    }

    async fn subscribe(
        &self,
        channel_pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(subscription_loop(
            self.client.clone(),
            channel_pattern.to_string(),
            handler,
            self.dispatch.clone(),
            ready_tx,
        ));

        match tokio::time::timeout(self.timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(Subscription::new(channel_pattern, vec![task])),
            Ok(Ok(Err(e))) => {
                task.abort();
                Err(e)
            }
            Ok(Err(_)) => Err(BrokerError::SubscribeFailed(
                "subscription task ended before it was ready".to_string(),
            )),
            Err(_) => {
                task.abort();
                Err(BrokerError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

/// Keeps a pattern subscription alive, reconnecting with exponential
/// backoff. The first attempt reports its outcome through `ready`.
async fn subscription_loop(
    client: redis::Client,
    pattern: String,
    handler: Arc<dyn MessageHandler>,
    dispatch: TaskPool,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);
    let mut backoff = Duration::from_secs(1);

    loop {
        let result = run_subscription(&client, &pattern, &handler, &dispatch, &mut ready).await;

        if let Some(ready) = ready.take() {
            // Still not subscribed on the first attempt: report and stop.
            let err = result.err().unwrap_or_else(|| {
                BrokerError::SubscribeFailed("subscription closed".to_string())
            });
            let _ = ready.send(Err(err));
            return;
        }

        match result {
            Ok(()) => {
                backoff = Duration::from_secs(1);
                tracing::warn!(pattern = %pattern, "Pub/sub connection closed, resubscribing");
            }
            Err(e) => {
                tracing::error!(
                    pattern = %pattern,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Pub/sub subscription error, reconnecting..."
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn run_subscription(
    client: &redis::Client,
    pattern: &str,
    handler: &Arc<dyn MessageHandler>,
    dispatch: &TaskPool,
    ready: &mut Option<oneshot::Sender<Result<()>>>,
) -> Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| map_broker_error(e, BrokerError::SubscribeFailed))?;
    pubsub
        .psubscribe(pattern)
        .await
        .map_err(|e| map_broker_error(e, BrokerError::SubscribeFailed))?;

    tracing::info!(pattern = %pattern, "Subscribed to pub/sub pattern");
    if let Some(ready) = ready.take() {
        let _ = ready.send(Ok(()));
    }

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let message = BrokerMessage::new(msg.get_channel_name(), msg.get_payload_bytes());
        let handler = Arc::clone(handler);
        dispatch.spawn(async move { handler.on_message(message).await });
    }

    Ok(())
}
