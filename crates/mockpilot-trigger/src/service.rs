//! Sharded single-writer runtime for the debounce engine.
//!
//! Sessions hash onto a fixed set of shard workers. Each shard owns a
//! [`DebounceEngine`] for its sessions and drains one mpsc inbox, so a given
//! session's window is only ever touched by one task and there is no lock
//! shared between shards. Each shard also runs the periodic sweep and
//! retries any requests the publisher is holding.
//!
//! Requests that cannot be delivered are reported as `error` events on the
//! errors channel so the affected session hears about them.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, gauge};
use mockpilot_bus::{BufferedPublisher, BusMessage, BusStatus, SharedBus, run_subscription};
use mockpilot_core::events::{ErrorPayload, EventPayload};
use mockpilot_core::{SessionId, SignalEvent};
use mockpilot_settings::{BusChannels, BusSettings, TriggerSettings};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::{DebounceEngine, EngineConfig};
use crate::errors::TriggerError;

/// Shard index for a session.
#[must_use]
pub fn shard_for(session_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    let h = hasher.finish() as usize;
    h % shards.max(1)
}

/// Producer name stamped on events the trigger emits itself.
pub const TRIGGER_PRODUCER: &str = "trigger";

/// Snapshot of one shard, refreshed after every sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardStatus {
    /// Session windows alive after the last sweep.
    pub windows: usize,
    /// Sweeps completed since start.
    pub sweeps: u64,
    /// Windows dropped for idleness since start.
    pub windows_reclaimed: u64,
}

/// Where a shard's output goes.
#[derive(Clone)]
struct Outputs {
    publisher: Arc<BufferedPublisher>,
    requests: String,
    errors: String,
}

impl Outputs {
    /// Publish an `error` event for `session_id`. Failures here are only logged.
    async fn report(&self, session_id: SessionId, code: &'static str, message: String) {
        counter!("trigger_errors_reported_total", "code" => code).increment(1);
        let event = SignalEvent::new(
            session_id,
            EventPayload::Error(ErrorPayload {
                message,
                detail: None,
                error_code: Some(code.to_string()),
            }),
        )
        .with_producer(TRIGGER_PRODUCER);
        let payload = match event.to_json() {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                error!(error = %e, "failed to encode error event");
                return;
            }
        };
        if let Err(e) = self.publisher.publish(&self.errors, payload).await {
            error!(channel = %self.errors, error = %e, "failed to publish error event");
        }
    }
}

/// Handle to the running shard workers.
pub struct TriggerService {
    inboxes: Vec<mpsc::Sender<SignalEvent>>,
    status: Vec<watch::Receiver<ShardStatus>>,
    outputs: Outputs,
    handles: Vec<JoinHandle<()>>,
}

struct Shard {
    index: usize,
    engine: DebounceEngine,
    inbox: mpsc::Receiver<SignalEvent>,
    outputs: Outputs,
    sweep_interval: Duration,
    status: watch::Sender<ShardStatus>,
}

impl TriggerService {
    /// Spawn `settings.shards` workers publishing requests to
    /// `channels.generation_requests` and failures to `channels.errors`.
    pub fn spawn(
        settings: &TriggerSettings,
        publisher: Arc<BufferedPublisher>,
        channels: &BusChannels,
        cancel: &CancellationToken,
    ) -> Self {
        let outputs = Outputs {
            publisher,
            requests: channels.generation_requests.clone(),
            errors: channels.errors.clone(),
        };
        let config = EngineConfig::from(settings);
        let shards = settings.shards.max(1);
        let mut inboxes = Vec::with_capacity(shards);
        let mut status = Vec::with_capacity(shards);
        let mut handles = Vec::with_capacity(shards);

        for index in 0..shards {
            let (tx, rx) = mpsc::channel(settings.shard_queue_capacity.max(1));
            let (status_tx, status_rx) = watch::channel(ShardStatus::default());
            let shard = Shard {
                index,
                engine: DebounceEngine::new(config.clone()),
                inbox: rx,
                outputs: outputs.clone(),
                sweep_interval: settings.sweep_interval(),
                status: status_tx,
            };
            handles.push(tokio::spawn(shard.run(cancel.child_token())));
            inboxes.push(tx);
            status.push(status_rx);
        }

        info!(shards, channel = %outputs.requests, "trigger service started");
        Self {
            inboxes,
            status,
            outputs,
            handles,
        }
    }

    /// Number of shard workers.
    pub fn shard_count(&self) -> usize {
        self.inboxes.len()
    }

    /// Latest status of every shard, by index.
    pub fn shard_status(&self) -> Vec<ShardStatus> {
        self.status.iter().map(|rx| *rx.borrow()).collect()
    }

    /// Route an event to the shard that owns its session.
    ///
    /// Waits for inbox space, so a saturated shard backpressures the caller.
    pub async fn submit(&self, event: SignalEvent) -> Result<(), TriggerError> {
        let index = shard_for(event.session_id.as_str(), self.inboxes.len());
        self.inboxes[index]
            .send(event)
            .await
            .map_err(|_| TriggerError::ShardStopped(index))
    }

    /// Decode a bus message and submit it.
    ///
    /// Malformed input is logged and dropped. An event whose shard has
    /// stopped is reported on the errors channel.
    pub async fn handle_message(&self, msg: &BusMessage, bus: &BusSettings) {
        let hint = bus.channels.kind_hint(&msg.channel);
        match SignalEvent::parse_with_hint(&msg.payload, hint) {
            Ok(event) => {
                let session_id = event.session_id.clone();
                if let Err(e) = self.submit(event).await {
                    warn!(%session_id, error = %e, "dropping event for stopped shard");
                    self.outputs
                        .report(session_id, "trigger_unavailable", e.to_string())
                        .await;
                }
            }
            Err(e) => {
                counter!("trigger_malformed_total", "reason" => e.reason()).increment(1);
                warn!(channel = %msg.channel, error = %e, "malformed signal event dropped");
            }
        }
    }

    /// Subscribe to the signal channels and feed every message to the shards.
    pub fn spawn_consumer(
        self: &Arc<Self>,
        bus: SharedBus,
        settings: Arc<BusSettings>,
        status: watch::Sender<BusStatus>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let channels = settings.channels.signal_channels();
        let policy = settings.backoff;
        tokio::spawn(run_subscription(
            "trigger",
            bus,
            channels,
            policy,
            status,
            cancel,
            move |msg: BusMessage| {
                let service = Arc::clone(&service);
                let settings = Arc::clone(&settings);
                async move { service.handle_message(&msg, &settings).await }
            },
        ))
    }

    /// Close the inboxes and hand back the worker handles for shutdown.
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        drop(self.inboxes);
        self.handles
    }
}

impl Shard {
    #[instrument(skip_all, fields(shard = self.index))]
    async fn run(mut self, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        let _ = sweep.tick().await;

        // a due sweep goes ahead of the inbox so a busy shard still reclaims
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = sweep.tick() => self.sweep().await,
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    self.ingest(event).await;
                }
            }
        }
        debug!("trigger shard stopped");
    }

    async fn sweep(&mut self) {
        let report = self.engine.sweep(Instant::now());
        let windows = self.engine.session_count();
        #[allow(clippy::cast_precision_loss)]
        gauge!("trigger_windows", "shard" => self.index.to_string()).set(windows as f64);
        if report.windows_dropped > 0 {
            debug!(dropped = report.windows_dropped, "sweep reclaimed windows");
        }
        self.status.send_modify(|status| {
            status.windows = windows;
            status.sweeps += 1;
            status.windows_reclaimed += report.windows_dropped as u64;
        });
        if let Err(e) = self.outputs.publisher.flush().await {
            warn!(error = %e, "flushing held requests failed");
        }
    }

    async fn ingest(&mut self, event: SignalEvent) {
        let session_id = event.session_id.clone();
        let requests = match self.engine.ingest(event, Instant::now()) {
            Ok(requests) => requests,
            Err(e) => {
                warn!(%session_id, error = %e, "trigger rejected event");
                return;
            }
        };
        for request in requests {
            let payload = match request.to_json() {
                Ok(json) => Bytes::from(json),
                Err(e) => {
                    error!(request_id = %request.request_id, error = %e, "failed to encode request");
                    self.outputs
                        .report(
                            request.session_id.clone(),
                            "request_encode_failed",
                            format!("generation request {} could not be encoded", request.request_id),
                        )
                        .await;
                    continue;
                }
            };
            match self.outputs.publisher.publish(&self.outputs.requests, payload).await {
                Ok(delivery) => {
                    debug!(request_id = %request.request_id, ?delivery, "generation request published");
                }
                Err(e) => {
                    error!(request_id = %request.request_id, error = %e, "failed to publish request");
                    self.outputs
                        .report(
                            request.session_id.clone(),
                            "request_publish_failed",
                            format!("generation request {} was not published: {e}", request.request_id),
                        )
                        .await;
                }
            }
        }
    }
}
