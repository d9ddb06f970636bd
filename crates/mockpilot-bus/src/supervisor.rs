//! Reconnecting subscription loop.
//!
//! Each consumer of the bus runs one [`run_subscription`] task. It moves
//! through an explicit state machine and publishes every transition on a
//! `watch` channel so the rest of the process can react (the hub turns
//! `Backoff` into a `service_down` notice for the bus):
//!
//! ```text
//! Connecting ──ok──▶ Subscribed ──stream lost──▶ Backoff(n) ──delay──▶ Connecting
//!      │                                             ▲
//!      └───────────────subscribe failed──────────────┘
//! ```
//!
//! Cancelling the token moves to `Stopped` from any state.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use mockpilot_core::retry::BackoffPolicy;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::BusError;
use crate::types::{BusMessage, SharedBus};

/// Subscription state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusStatus {
    /// Attempting to subscribe.
    Connecting,
    /// Receiving messages.
    Subscribed,
    /// Waiting before reconnect attempt `attempt` (1-based).
    Backoff {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// Cancelled; the task has exited.
    Stopped,
}

impl BusStatus {
    /// Whether messages are currently flowing.
    #[must_use]
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

/// Subscribe to `channels` and feed every message to `handler` until cancelled.
///
/// Lag is logged and counted but does not reconnect. Connectivity loss and
/// stream termination go through backoff. The backoff attempt counter resets
/// once a subscription is established.
pub async fn run_subscription<F, Fut>(
    name: &'static str,
    bus: SharedBus,
    channels: Vec<String>,
    policy: BackoffPolicy,
    status: watch::Sender<BusStatus>,
    cancel: CancellationToken,
    mut handler: F,
) where
    F: FnMut(BusMessage) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let mut attempt: u32 = 0;

    loop {
        let _ = status.send_replace(BusStatus::Connecting);

        let subscribed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = bus.subscribe(&channels) => r,
        };

        match subscribed {
            Ok(mut stream) => {
                attempt = 0;
                let _ = status.send_replace(BusStatus::Subscribed);
                info!(subscriber = name, ?channels, "bus subscription established");

                loop {
                    let item = tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            let _ = status.send_replace(BusStatus::Stopped);
                            return;
                        }
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(msg)) => handler(msg).await,
                        Some(Err(BusError::Lagged(n))) => {
                            warn!(subscriber = name, skipped = n, "bus subscriber lagged");
                            counter!("bus_lagged_messages_total", "subscriber" => name).increment(n);
                        }
                        Some(Err(e)) => {
                            warn!(subscriber = name, error = %e, "bus subscription lost");
                            break;
                        }
                        None => {
                            warn!(subscriber = name, "bus subscription ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(subscriber = name, error = %e, attempt, "bus subscribe failed");
            }
        }

        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        counter!("bus_reconnects_total", "subscriber" => name).increment(1);
        let _ = status.send_replace(BusStatus::Backoff { attempt, delay });

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    let _ = status.send_replace(BusStatus::Stopped);
}
