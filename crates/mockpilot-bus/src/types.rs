//! The bus contract.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::errors::BusError;

/// One message as received from a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel it was published on.
    pub channel: Arc<str>,
    /// Opaque payload; JSON by convention.
    pub payload: Bytes,
}

impl BusMessage {
    /// Build a message.
    #[must_use]
    pub fn new(channel: &str, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: Arc::from(channel),
            payload: payload.into(),
        }
    }
}

/// Stream of messages for one subscription.
///
/// Ends (or yields a connectivity error) when the subscription is severed.
pub type BusStream = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

/// Named-channel publish/subscribe.
///
/// Publishing is safe from concurrent callers. Ordering is only promised
/// within one publisher's stream on one channel.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe to every channel in `channels`.
    async fn subscribe(&self, channels: &[String]) -> Result<BusStream, BusError>;
}

/// Shared handle used across subscription and publishing tasks.
pub type SharedBus = Arc<dyn Bus>;
