use thiserror::Error;

/// Errors that can occur while talking to an event broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("Broker operation timed out after {0}ms")]
    Timeout(u64),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
