//! Bus bridge: subscribes to the producer channels and the generation
//! request channel and routes everything through the [`Hub`].

use std::sync::Arc;

use metrics::counter;
use mockpilot_bus::{BusMessage, BusStatus, SharedBus, run_subscription};
use mockpilot_core::retry::BackoffPolicy;
use mockpilot_core::{EventKind, GenerationRequest, SignalEvent};
use mockpilot_settings::types::BusChannels;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::Hub;
use crate::hub::frame::ServiceNotice;
use crate::hub::liveness::LivenessMonitor;

/// Bridges bus traffic to connected clients.
pub struct HubBridge {
    hub: Arc<Hub>,
    liveness: Arc<LivenessMonitor>,
    channels: BusChannels,
}

impl HubBridge {
    /// Create a bridge.
    pub fn new(hub: Arc<Hub>, liveness: Arc<LivenessMonitor>, channels: BusChannels) -> Self {
        Self {
            hub,
            liveness,
            channels,
        }
    }

    /// Channels the bridge subscribes to.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels = self.channels.client_event_channels();
        channels.push(self.channels.generation_requests.clone());
        channels
    }

    /// Decode and route one bus message. Returns the number of connections
    /// it was queued on. Malformed input is logged, counted and dropped.
    pub fn handle_message(&self, msg: &BusMessage) -> usize {
        if *msg.channel == *self.channels.generation_requests {
            return match serde_json::from_slice::<GenerationRequest>(&msg.payload) {
                Ok(request) => self.hub.route_request(&request),
                Err(e) => {
                    counter!("hub_malformed_total", "reason" => "invalid_request").increment(1);
                    warn!(channel = %msg.channel, error = %e, "malformed generation request dropped");
                    0
                }
            };
        }

        let hint = self.channels.kind_hint(&msg.channel);
        match SignalEvent::parse_with_hint(&msg.payload, hint) {
            Ok(event) => {
                self.note_liveness(&event);
                self.hub.route(&event)
            }
            Err(e) => {
                counter!("hub_malformed_total", "reason" => e.reason()).increment(1);
                warn!(channel = %msg.channel, error = %e, "malformed signal event dropped");
                0
            }
        }
    }

    fn note_liveness(&self, event: &SignalEvent) {
        let change = if event.kind() == EventKind::Liveness {
            self.liveness.observe(event.producer_name())
        } else {
            match event.producer.as_deref() {
                Some(p) if !p.trim().is_empty() => self.liveness.refresh(p),
                _ if event.kind() == EventKind::Error => None,
                _ => self.liveness.refresh(event.kind().default_producer()),
            }
        };
        if let Some(change) = change {
            self.liveness.publish(&self.hub, &change);
        }
    }

    /// Run the subscription loop until cancelled.
    pub fn spawn(
        self: Arc<Self>,
        bus: SharedBus,
        policy: BackoffPolicy,
        status: watch::Sender<BusStatus>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let channels = self.subscribed_channels();
        tokio::spawn(run_subscription(
            "hub",
            bus,
            channels,
            policy,
            status,
            cancel,
            move |msg: BusMessage| {
                let _ = self.handle_message(&msg);
                std::future::ready(())
            },
        ))
    }
}

/// Tell every session when the bus drops and when it comes back.
///
/// The bus counts as down while any subscription is in backoff, and as
/// restored once all of them are subscribed again.
pub fn spawn_bus_watch(
    hub: Arc<Hub>,
    mut statuses: Vec<watch::Receiver<BusStatus>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if statuses.is_empty() {
            return;
        }
        let mut down = false;
        loop {
            let changed = futures::future::select_all(
                statuses.iter_mut().map(|rx| Box::pin(rx.changed())),
            );
            tokio::select! {
                () = cancel.cancelled() => break,
                (result, _, _) = changed => {
                    if result.is_err() {
                        break;
                    }
                }
            }

            let backing_off = statuses
                .iter()
                .any(|rx| matches!(*rx.borrow(), BusStatus::Backoff { .. }));
            let all_up = statuses.iter().all(|rx| rx.borrow().is_up());
            if backing_off && !down {
                down = true;
                warn!("event bus unavailable, notifying sessions");
                let _ = hub.broadcast_service(&ServiceNotice::down(
                    "bus",
                    "lost connection to the event bus, reconnecting",
                ));
            } else if down && all_up {
                down = false;
                info!("event bus restored");
                let _ = hub.broadcast_service(&ServiceNotice::restored("bus"));
            }
        }
    })
}
