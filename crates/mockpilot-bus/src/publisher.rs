//! Publishing that survives short bus outages.
//!
//! While the bus rejects publishes, outgoing messages wait in a bounded FIFO.
//! When the FIFO is full the oldest held message is dropped. Every publish
//! first tries to flush what is held, so a single publisher's stream stays
//! in order across the outage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::BusError;
use crate::types::SharedBus;

/// What happened to a message handed to [`BufferedPublisher::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Accepted by the bus.
    Sent,
    /// Held for a later flush.
    Held,
}

/// Publisher with a bounded hold buffer.
pub struct BufferedPublisher {
    bus: SharedBus,
    held: Mutex<VecDeque<(String, Bytes)>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl BufferedPublisher {
    /// Wrap `bus`, holding at most `capacity` messages during outages.
    #[must_use]
    pub fn new(bus: SharedBus, capacity: usize) -> Self {
        Self {
            bus,
            held: Mutex::new(VecDeque::new()),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Publish now, or hold if the bus is down.
    ///
    /// Only non-connectivity errors are returned; connectivity failures are
    /// absorbed into the hold buffer.
    pub async fn publish(&self, channel: &str, payload: Bytes) -> Result<Delivery, BusError> {
        let mut held = self.held.lock().await;

        if !held.is_empty() {
            self.flush_locked(&mut held).await?;
        }
        if held.is_empty() {
            match self.bus.publish(channel, payload.clone()).await {
                Ok(()) => return Ok(Delivery::Sent),
                Err(e) if e.is_connectivity() => {
                    debug!(channel, error = %e, "bus down, holding message");
                }
                Err(e) => return Err(e),
            }
        }

        self.hold(&mut held, channel, payload);
        Ok(Delivery::Held)
    }

    /// Try to publish everything held. Returns how many were sent.
    pub async fn flush(&self) -> Result<usize, BusError> {
        let mut held = self.held.lock().await;
        self.flush_locked(&mut held).await
    }

    /// Messages currently held.
    pub async fn held_len(&self) -> usize {
        self.held.lock().await.len()
    }

    /// Held messages dropped to make room since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops at the first connectivity failure, leaving the rest held.
    async fn flush_locked(&self, held: &mut VecDeque<(String, Bytes)>) -> Result<usize, BusError> {
        let mut sent = 0;
        while let Some((channel, payload)) = held.front() {
            match self.bus.publish(channel, payload.clone()).await {
                Ok(()) => {
                    let _ = held.pop_front();
                    sent += 1;
                }
                Err(e) if e.is_connectivity() => break,
                Err(e) => return Err(e),
            }
        }
        if sent > 0 {
            debug!(sent, remaining = held.len(), "flushed held bus messages");
        }
        Ok(sent)
    }

    fn hold(&self, held: &mut VecDeque<(String, Bytes)>, channel: &str, payload: Bytes) {
        if self.capacity == 0 {
            self.record_drop(channel);
            return;
        }
        while held.len() >= self.capacity {
            if let Some((old_channel, _)) = held.pop_front() {
                self.record_drop(&old_channel);
            }
        }
        held.push_back((channel.to_string(), payload));
    }

    fn record_drop(&self, channel: &str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("bus_held_dropped_total").increment(1);
        if total.is_power_of_two() {
            warn!(channel, total, "bus hold buffer full, dropping oldest message");
        }
    }
}
