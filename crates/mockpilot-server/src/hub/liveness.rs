//! Upstream producer liveness.
//!
//! Producers publish heartbeats; once a producer is tracked, every event it
//! emits also counts as a sign of life.
//!
//! Each tick of the monitor checks whether each known producer was heard
//! from since the previous tick. After `max_missed` silent ticks in a row a
//! producer is reported down once; the next sighting reports it restored.
//!
//! Expected producers and the default producer of each event kind are
//! always tracked. Any other heartbeat name is tracked only while fewer than
//! [`MAX_DISCOVERED_PRODUCERS`] such names are known; past that it is ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use mockpilot_core::EventKind;
use tracing::{debug, info, warn};

use super::Hub;
use super::frame::ServiceNotice;

/// A producer changed availability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LivenessChange {
    /// Silent for `missed` consecutive intervals.
    Down {
        /// Producer name.
        producer: String,
        /// Consecutive intervals missed.
        missed: u32,
    },
    /// Heard from again after being reported down.
    Restored {
        /// Producer name.
        producer: String,
    },
}

impl LivenessChange {
    /// Client notice for this change.
    #[must_use]
    pub fn notice(&self, interval: Duration) -> ServiceNotice {
        match self {
            Self::Down { producer, missed } => ServiceNotice::down(
                producer.clone(),
                format!(
                    "{producer} has not reported for {missed} intervals of {}s",
                    interval.as_secs()
                ),
            ),
            Self::Restored { producer } => ServiceNotice::restored(producer.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct ProducerState {
    seen_since_tick: bool,
    missed: u32,
    down: bool,
}

/// Heartbeat names outside the known set that will be tracked.
pub const MAX_DISCOVERED_PRODUCERS: usize = 32;

/// Tracks heartbeats per producer.
pub struct LivenessMonitor {
    interval: Duration,
    max_missed: u32,
    known: HashSet<String>,
    producers: Mutex<HashMap<String, ProducerState>>,
}

impl LivenessMonitor {
    /// Create a monitor. `expected` producers are tracked from the start, so
    /// one that never reports is still flagged.
    #[must_use]
    pub fn new(interval: Duration, max_missed: u32, expected: &[String]) -> Self {
        let producers = expected
            .iter()
            .map(|p| (p.clone(), ProducerState::default()))
            .collect();
        let known = expected
            .iter()
            .cloned()
            .chain(
                EventKind::ALL
                    .into_iter()
                    .filter(|k| !matches!(k, EventKind::Liveness | EventKind::Error))
                    .map(|k| k.default_producer().to_string()),
            )
            .collect();
        Self {
            interval,
            max_missed: max_missed.max(1),
            known,
            producers: Mutex::new(producers),
        }
    }

    /// Heartbeat interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a sign of life from `producer`.
    ///
    /// Starts tracking the name on first sight unless the discovery cap is
    /// reached.
    pub fn observe(&self, producer: &str) -> Option<LivenessChange> {
        let mut producers = self.producers.lock();
        if !producers.contains_key(producer) && !self.known.contains(producer) {
            let discovered = producers.keys().filter(|p| !self.known.contains(*p)).count();
            if discovered >= MAX_DISCOVERED_PRODUCERS {
                counter!("hub_liveness_ignored_total").increment(1);
                debug!(producer, "producer limit reached, heartbeat ignored");
                return None;
            }
        }
        let state = producers.entry(producer.to_string()).or_default();
        state.seen_since_tick = true;
        state.missed = 0;
        if state.down {
            state.down = false;
            return Some(LivenessChange::Restored {
                producer: producer.to_string(),
            });
        }
        None
    }

    /// Refresh a producer already being tracked. Unknown names are ignored,
    /// so producers that only emit sporadically are never flagged.
    pub fn refresh(&self, producer: &str) -> Option<LivenessChange> {
        if !self.producers.lock().contains_key(producer) {
            return None;
        }
        self.observe(producer)
    }

    /// Close one interval and report producers that just crossed the limit.
    pub fn tick(&self) -> Vec<LivenessChange> {
        let mut changes = Vec::new();
        let mut producers = self.producers.lock();
        for (name, state) in producers.iter_mut() {
            if std::mem::take(&mut state.seen_since_tick) {
                continue;
            }
            state.missed = state.missed.saturating_add(1);
            if state.missed >= self.max_missed && !state.down {
                state.down = true;
                changes.push(LivenessChange::Down {
                    producer: name.clone(),
                    missed: state.missed,
                });
            }
        }
        let down = producers.values().filter(|s| s.down).count();
        gauge!("hub_producers_down").set(down as f64);
        changes
    }

    /// Whether `producer` is currently reported down.
    pub fn is_down(&self, producer: &str) -> bool {
        self.producers.lock().get(producer).is_some_and(|s| s.down)
    }

    /// Producers being tracked.
    pub fn producer_count(&self) -> usize {
        self.producers.lock().len()
    }

    /// Tick every interval and broadcast changes to all sessions.
    pub fn spawn(self: &Arc<Self>, hub: Arc<Hub>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        for change in monitor.tick() {
                            monitor.publish(&hub, &change);
                        }
                    }
                }
            }
            info!("liveness monitor stopped");
        })
    }

    /// Broadcast a change as a `service_down` frame.
    pub fn publish(&self, hub: &Hub, change: &LivenessChange) {
        match change {
            LivenessChange::Down { producer, missed } => {
                warn!(producer, missed, "producer unavailable");
                counter!("hub_producer_down_total").increment(1);
            }
            LivenessChange::Restored { producer } => info!(producer, "producer restored"),
        }
        let _ = hub.broadcast_service(&change.notice(self.interval));
    }
}
