//! In-memory broker.
//!
//! Process-local fan-out over a tokio broadcast channel. Every subscriber
//! sees every message whose channel matches its pattern. Delivery is
//! at-most-once: a subscriber that falls more than the channel capacity
//! behind loses the oldest messages.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use cachesync_core::broker::{BrokerMessage, EventBroker, MessageHandler, Result, Subscription};
use cachesync_core::cache::pattern_matches;

use crate::pool::TaskPool;

/// Channel capacity for in-flight messages.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    sender: broadcast::Sender<BrokerMessage>,
    dispatch: TaskPool,
}

impl MemoryBroker {
    /// Creates a broker that runs handlers on `dispatch`.
    pub fn new(dispatch: TaskPool) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, dispatch }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventBroker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        // No receivers just means nobody is listening.
        let _ = self.sender.send(BrokerMessage::new(channel, payload));
        Ok(())
    }

    async fn subscribe(
        &self,
        channel_pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        // Subscribe before spawning so nothing published after we return
        // can be missed.
        let mut receiver = self.sender.subscribe();
        let pattern = channel_pattern.to_string();
        let dispatch = self.dispatch.clone();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if !pattern_matches(&pattern, &message.channel) {
                            continue;
                        }
                        let handler = Arc::clone(&handler);
                        dispatch.spawn(async move { handler.on_message(message).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(pattern = %pattern, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!(pattern = %pattern, "Broker closed, ending subscription");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(channel_pattern, vec![task]))
    }
}
