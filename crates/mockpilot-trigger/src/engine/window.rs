//! Per-session debounce state.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use mockpilot_core::SignalEvent;
use tokio::time::Instant;

/// An event plus the time the engine observed it.
#[derive(Debug)]
pub(crate) struct Buffered {
    pub(crate) event: SignalEvent,
    pub(crate) at: Instant,
}

/// Sliding window for one session.
///
/// Boundaries and requests are tracked as epochs rather than timestamps so
/// that two events observed at the same instant still order correctly.
#[derive(Debug)]
pub(crate) struct DebounceWindow {
    pub(crate) buffer: VecDeque<Buffered>,
    /// Incremented on every observed boundary.
    pub(crate) boundary_epoch: u64,
    /// `boundary_epoch` at the time of the last emitted request.
    pub(crate) request_epoch: u64,
    pub(crate) last_boundary: Option<Instant>,
    pub(crate) last_request_at: Option<Instant>,
    /// Fingerprint → expiry.
    pub(crate) fingerprints: HashMap<String, Instant>,
    pub(crate) last_activity: Instant,
    /// Arrival of the newest event, kept across horizon eviction.
    pub(crate) last_event_at: Option<Instant>,
}

impl DebounceWindow {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            buffer: VecDeque::new(),
            boundary_epoch: 0,
            request_epoch: 0,
            last_boundary: None,
            last_request_at: None,
            fingerprints: HashMap::new(),
            last_activity: now,
            last_event_at: None,
        }
    }

    /// Time since the previous event of this window, if there was one.
    ///
    /// Independent of the buffer, so a pause longer than the horizon still
    /// reads as a gap after eviction has emptied it.
    pub(crate) fn gap_since_last_event(&self, now: Instant) -> Option<Duration> {
        self.last_event_at.map(|at| now.saturating_duration_since(at))
    }

    pub(crate) fn push(&mut self, event: SignalEvent, now: Instant) {
        self.last_activity = now;
        self.last_event_at = Some(now);
        self.buffer.push_back(Buffered { event, at: now });
    }

    /// No activity for longer than `ttl`.
    pub(crate) fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > ttl
    }

    /// Drop buffered events older than `horizon`. Returns how many were dropped.
    pub(crate) fn evict(&mut self, now: Instant, horizon: Duration) -> usize {
        let mut evicted = 0;
        while self
            .buffer
            .front()
            .is_some_and(|b| now.saturating_duration_since(b.at) > horizon)
        {
            let _ = self.buffer.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Forget fingerprints whose expiry has passed. Returns how many were removed.
    pub(crate) fn expire_fingerprints(&mut self, now: Instant) -> usize {
        let before = self.fingerprints.len();
        self.fingerprints.retain(|_, expiry| *expiry > now);
        before - self.fingerprints.len()
    }

    pub(crate) fn mark_boundary(&mut self, now: Instant) {
        self.boundary_epoch += 1;
        self.last_boundary = Some(now);
    }

    pub(crate) fn boundary_since_request(&self) -> bool {
        self.boundary_epoch > self.request_epoch
    }

    pub(crate) fn has_live_fingerprint(&self, fp: &str, now: Instant) -> bool {
        self.fingerprints.get(fp).is_some_and(|expiry| *expiry > now)
    }

    pub(crate) fn record_request(&mut self, fp: String, now: Instant, horizon: Duration) {
        let _ = self.fingerprints.insert(fp, now + horizon);
        self.request_epoch = self.boundary_epoch;
        self.last_request_at = Some(now);
    }
}
