//! Broker fake recording what the buses publish.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cachesync_core::broker::{
    BrokerError, EventBroker, MessageHandler, Result, Subscription,
};

/// (channel, partition key, payload)
pub type Published = (String, Option<String>, Vec<u8>);

#[derive(Default)]
pub struct RecordingBroker {
    published: RwLock<Vec<Published>>,
    fail: bool,
}

impl RecordingBroker {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub async fn published(&self) -> Vec<Published> {
        self.published.read().await.clone()
    }

    async fn record(&self, channel: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        if self.fail {
            return Err(BrokerError::PublishFailed("broker down".to_string()));
        }
        self.published.write().await.push((
            channel.to_string(),
            key.map(str::to_string),
            payload.to_vec(),
        ));
        Ok(())
    }
}

#[async_trait]
impl EventBroker for RecordingBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        self.record(channel, None, payload).await
    }

    async fn publish_keyed(&self, channel: &str, partition_key: &str, payload: &[u8]) -> Result<()> {
        self.record(channel, Some(partition_key), payload).await
    }

    async fn subscribe(
        &self,
        channel_pattern: &str,
        _handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription> {
        Ok(Subscription::new(channel_pattern, Vec::new()))
    }
}
