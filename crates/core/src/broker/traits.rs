use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::Result;

/// A raw message delivered by a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Concrete channel the message was published on.
    pub channel: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, for logging dropped messages.
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Receiver side of a subscription.
///
/// Implementations must not panic on bad input; anything that goes wrong
/// while handling a message is logged and swallowed so the subscription
/// keeps flowing.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: BrokerMessage);
}

/// Handle to an active subscription.
///
/// Dropping the handle leaves the subscription running for the lifetime
/// of the process; call [`Subscription::unsubscribe`] to stop it.
#[must_use = "a subscription runs until `unsubscribe` is called"]
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(pattern: impl Into<String>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            pattern: pattern.into(),
            tasks,
        }
    }

    /// The channel pattern this subscription listens on.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true once every receive loop behind this subscription exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.is_finished())
    }

    /// Stops every receive loop behind this subscription.
    pub fn unsubscribe(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Publish/subscribe transport carrying event payloads between processes.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Publishes a payload on a channel.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Publishes a payload with a partition key.
    ///
    /// Backends that keep per-partition ordering route all payloads with
    /// the same key to the same partition. Other backends ignore the key.
    async fn publish_keyed(&self, channel: &str, partition_key: &str, payload: &[u8]) -> Result<()> {
        let _ = partition_key;
        self.publish(channel, payload).await
    }

    /// Subscribes a handler to every channel matching `channel_pattern`.
    ///
    /// The subscription is active when this returns: messages published
    /// afterwards are delivered according to the backend's guarantees.
    async fn subscribe(
        &self,
        channel_pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription>;
}
