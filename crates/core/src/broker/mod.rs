//! Broker abstraction shared by every transport backend.

mod error;
mod traits;

pub use error::{BrokerError, Result};
pub use traits::{BrokerMessage, EventBroker, MessageHandler, Subscription};
