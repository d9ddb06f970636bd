//! In-process broker.
//!
//! One `tokio::sync::broadcast` channel carries every bus channel, so a
//! single publisher's messages keep their order for each subscriber.
//! Subscribers filter by channel name on receipt.
//!
//! [`LocalBus::set_available`] simulates broker outages: while unavailable,
//! publish and subscribe fail with [`BusError::Unavailable`], and live
//! subscriptions end with [`BusError::ConnectionLost`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::BusError;
use crate::types::{Bus, BusMessage, BusStream};

/// In-process [`Bus`].
pub struct LocalBus {
    tx: broadcast::Sender<BusMessage>,
    available: AtomicBool,
    /// Cancelled when an outage begins; replaced on recovery.
    outage: Mutex<CancellationToken>,
    published: AtomicU64,
}

impl LocalBus {
    /// Create a broker buffering up to `capacity` messages per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            available: AtomicBool::new(true),
            outage: Mutex::new(CancellationToken::new()),
            published: AtomicU64::new(0),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was == available {
            return;
        }
        let mut outage = self.outage.lock();
        if available {
            *outage = CancellationToken::new();
            info!("local bus available");
        } else {
            outage.cancel();
            info!("local bus unavailable");
        }
    }

    /// Whether the broker currently accepts traffic.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Messages accepted since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BusError> {
        if !self.is_available() {
            return Err(BusError::Unavailable);
        }
        let _ = self.published.fetch_add(1, Ordering::Relaxed);
        // no receivers is not an error: nobody is listening on any channel yet
        if self.tx.send(BusMessage::new(channel, payload)).is_err() {
            debug!(channel, "published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<BusStream, BusError> {
        if !self.is_available() {
            return Err(BusError::Unavailable);
        }
        let wanted: HashSet<String> = channels.iter().cloned().collect();
        let mut rx = self.tx.subscribe();
        let outage = self.outage.lock().clone();

        Ok(Box::pin(async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = outage.cancelled() => None,
                    r = rx.recv() => Some(r),
                };
                match next {
                    None => {
                        yield Err(BusError::ConnectionLost);
                        break;
                    }
                    Some(Ok(msg)) => {
                        if wanted.contains(&*msg.channel) {
                            yield Ok(msg);
                        }
                    }
                    Some(Err(broadcast::error::RecvError::Lagged(n))) => {
                        yield Err(BusError::Lagged(n));
                    }
                    Some(Err(broadcast::error::RecvError::Closed)) => {
                        yield Err(BusError::Closed);
                        break;
                    }
                }
            }
        }))
    }
}
