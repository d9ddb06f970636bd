//! Session fan-out hub.
//!
//! Sessions live in a sharded [`DashMap`] keyed by session id, so attaching,
//! routing and sweeping for different sessions never contend on one lock.
//! Each session holds the handles of its attached connections; routing an
//! event serializes it once and enqueues the shared body onto every handle.
//! Events for a session with no attached connection are dropped: the relay
//! is live-only and keeps no replay buffer.

pub mod connection;
pub mod frame;
pub mod liveness;
pub mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use mockpilot_bus::BufferedPublisher;
use mockpilot_core::events::SCHEMA_VERSION;
use mockpilot_core::{ConnectionId, EventKind, GenerationRequest, SessionId, SignalEvent};
use mockpilot_settings::MockpilotSettings;
use mockpilot_settings::types::BusChannels;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use self::connection::{CloseReason, ConnectionHandle, ConnectionState};
use self::frame::{InboundKind, OutboundKind, ServiceNotice, classify_inbound, to_raw};
use crate::errors::HubError;

/// Hub tuning.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Lifetime of a session from its first attach.
    pub session_ttl: Duration,
    /// How long a session with no connections survives before a sweep reclaims it.
    pub vacancy_grace: Duration,
    /// Per-connection queue bound, in messages.
    pub queue_max_messages: usize,
    /// Per-connection queue bound, in payload bytes.
    pub queue_max_bytes: usize,
    /// Largest inbound client frame accepted.
    pub max_frame_bytes: usize,
    /// Bus channel names.
    pub channels: BusChannels,
}

impl HubConfig {
    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &MockpilotSettings) -> Self {
        Self {
            session_ttl: settings.hub.session_ttl(),
            vacancy_grace: settings.hub.sweep_interval(),
            queue_max_messages: settings.hub.queue_max_messages,
            queue_max_bytes: settings.hub.queue_max_bytes,
            max_frame_bytes: settings.server.max_frame_bytes,
            channels: settings.bus.channels.clone(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_settings(&MockpilotSettings::default())
    }
}

/// Result of one [`Hub::sweep`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubSweep {
    /// Sessions removed because their TTL elapsed.
    pub expired: usize,
    /// Empty sessions reclaimed after the vacancy grace.
    pub vacated: usize,
}

struct SessionEntry {
    expires_at: Instant,
    vacant_since: Option<Instant>,
    /// Last attach, routed event or forwarded client frame.
    last_seen: Instant,
    connections: Vec<Arc<ConnectionHandle>>,
}

impl SessionEntry {
    fn new(now: Instant, ttl: Duration) -> Self {
        Self {
            expires_at: now + ttl,
            vacant_since: None,
            last_seen: now,
            connections: Vec::new(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Envelope published to the bus for each forwarded client frame.
#[derive(Serialize)]
struct InboundEnvelope<'a> {
    schema_version: &'static str,
    kind: &'static str,
    session_id: &'a SessionId,
    connection_id: &'a ConnectionId,
    received_at: DateTime<Utc>,
    frame: &'a RawValue,
}

/// Session registry and fan-out.
pub struct Hub {
    config: HubConfig,
    sessions: DashMap<SessionId, SessionEntry>,
    publisher: Arc<BufferedPublisher>,
    live: AtomicUsize,
    draining: AtomicBool,
    idle: Notify,
}

impl Hub {
    /// Create a hub forwarding client frames through `publisher`.
    #[must_use]
    pub fn new(config: HubConfig, publisher: Arc<BufferedPublisher>) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            publisher,
            live: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            idle: Notify::new(),
        }
    }

    /// Hub tuning.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Attach a new connection to `session_id`, creating the session on
    /// first attach. The caller must have verified credentials already.
    ///
    /// Attaching to an expired session starts a fresh one; connections
    /// still attached to the old one are closed.
    pub fn attach(&self, session_id: SessionId) -> Result<Arc<ConnectionHandle>, HubError> {
        if self.is_draining() {
            return Err(HubError::Draining);
        }
        let now = Instant::now();
        let handle = Arc::new(ConnectionHandle::new(
            session_id.clone(),
            self.config.queue_max_messages,
            self.config.queue_max_bytes,
        ));

        let stale = {
            let mut entry = self
                .sessions
                .entry(session_id.clone())
                .or_insert_with(|| SessionEntry::new(now, self.config.session_ttl));
            let stale = if entry.is_expired(now) {
                let old = std::mem::take(&mut entry.connections);
                *entry = SessionEntry::new(now, self.config.session_ttl);
                old
            } else {
                Vec::new()
            };
            entry.vacant_since = None;
            entry.last_seen = now;
            entry.connections.push(Arc::clone(&handle));
            stale
        };
        for conn in &stale {
            let _ = conn.close(CloseReason::SessionExpired);
        }

        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!("hub_connections_active").set(live as f64);
        gauge!("hub_sessions_active").set(self.sessions.len() as f64);
        info!(session_id = %session_id, connection_id = %handle.id, "connection attached");
        Ok(handle)
    }

    /// Detach a connection. Safe to call more than once.
    pub fn detach(&self, handle: &ConnectionHandle) {
        if !handle.mark_detached() {
            return;
        }
        let _ = handle.close(CloseReason::ClientGone);

        if let Some(mut entry) = self.sessions.get_mut(&handle.session_id) {
            entry.connections.retain(|c| c.id != handle.id);
            if entry.connections.is_empty() {
                entry.vacant_since = Some(Instant::now());
            }
        }

        let live = match self.live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            Some(n.saturating_sub(1))
        }) {
            Ok(prev) | Err(prev) => prev.saturating_sub(1),
        };
        gauge!("hub_connections_active").set(live as f64);
        if live == 0 {
            self.idle.notify_waiters();
        }
        info!(
            session_id = %handle.session_id,
            connection_id = %handle.id,
            delivered = handle.delivered_count(),
            dropped = handle.drop_count(),
            "connection detached"
        );
    }

    /// Forward a client frame to the producer channel for its kind.
    ///
    /// The frame is not interpreted beyond its `kind`.
    pub async fn deliver_inbound(&self, handle: &ConnectionHandle, text: &str) -> Result<(), HubError> {
        if text.len() > self.config.max_frame_bytes {
            return Err(HubError::FrameTooLarge {
                len: text.len(),
                max: self.config.max_frame_bytes,
            });
        }
        let accepting = matches!(
            handle.state(),
            ConnectionState::Connecting | ConnectionState::Active
        );
        if self.is_draining() || !accepting {
            return Err(HubError::Draining);
        }
        self.touch_session(&handle.session_id)?;

        let kind = classify_inbound(text)?;
        let channel = match kind {
            InboundKind::AudioChunk => &self.config.channels.audio_chunks,
            InboundKind::EditRequest => &self.config.channels.edit_requests,
        };
        let frame: &RawValue = serde_json::from_str(text)?;
        let envelope = InboundEnvelope {
            schema_version: SCHEMA_VERSION,
            kind: kind.as_str(),
            session_id: &handle.session_id,
            connection_id: &handle.id,
            received_at: Utc::now(),
            frame,
        };
        let payload = serde_json::to_vec(&envelope)?;
        let _ = self.publisher.publish(channel, Bytes::from(payload)).await?;
        counter!("hub_inbound_frames_total", "kind" => kind.as_str()).increment(1);
        trace!(session_id = %handle.session_id, kind = kind.as_str(), "inbound frame forwarded");
        Ok(())
    }

    /// Fails for unknown or expired sessions, otherwise marks activity.
    fn touch_session(&self, session_id: &SessionId) -> Result<(), HubError> {
        let now = Instant::now();
        match self.sessions.get_mut(session_id) {
            None => Err(HubError::SessionNotFound(session_id.clone())),
            Some(entry) if entry.is_expired(now) => Err(HubError::SessionExpired(session_id.clone())),
            Some(mut entry) => {
                entry.last_seen = now;
                Ok(())
            }
        }
    }

    /// Fan a signal event out to its session. Returns the number of
    /// connections it was queued on.
    ///
    /// Liveness events are consumed by the liveness monitor and never
    /// reach clients.
    pub fn route(&self, event: &SignalEvent) -> usize {
        let kind = match event.kind() {
            EventKind::Transcript => OutboundKind::Transcript,
            EventKind::Intent => OutboundKind::Intent,
            EventKind::Artifact => OutboundKind::Artifact,
            EventKind::Analytics => OutboundKind::Insight,
            EventKind::Error => OutboundKind::Error,
            EventKind::Liveness => return 0,
        };
        match to_raw(event) {
            Ok(data) => self.fan_out(&event.session_id, kind, &data),
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "failed to encode event");
                0
            }
        }
    }

    /// Fan a generation request out to its session as a `request` frame.
    pub fn route_request(&self, request: &GenerationRequest) -> usize {
        match to_raw(request) {
            Ok(data) => self.fan_out(&request.session_id, OutboundKind::Request, &data),
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "failed to encode request");
                0
            }
        }
    }

    fn fan_out(&self, session_id: &SessionId, kind: OutboundKind, data: &Arc<RawValue>) -> usize {
        let now = Instant::now();
        let targets = match self.sessions.get_mut(session_id) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.last_seen = now;
                entry.connections.clone()
            }
            _ => Vec::new(),
        };
        if targets.is_empty() {
            counter!("hub_events_dropped_total", "reason" => "no_connection").increment(1);
            trace!(session_id = %session_id, %kind, "no attached connection, dropping");
            return 0;
        }

        let queued = targets
            .iter()
            .filter(|conn| conn.enqueue(kind, Arc::clone(data)))
            .count();
        counter!("hub_events_routed_total", "kind" => kind.as_str()).increment(1);
        queued
    }

    /// Queue a frame on every connection of every session.
    pub fn broadcast_all(&self, kind: OutboundKind, data: &Arc<RawValue>) -> usize {
        let targets: Vec<Arc<ConnectionHandle>> = self
            .sessions
            .iter()
            .flat_map(|entry| entry.connections.clone())
            .collect();
        let queued = targets
            .iter()
            .filter(|conn| conn.enqueue(kind, Arc::clone(data)))
            .count();
        debug!(%kind, recipients = queued, "broadcast to all sessions");
        queued
    }

    /// Broadcast a `service_down` notice.
    pub fn broadcast_service(&self, notice: &ServiceNotice) -> usize {
        match to_raw(notice) {
            Ok(data) => self.broadcast_all(OutboundKind::ServiceDown, &data),
            Err(e) => {
                warn!(error = %e, "failed to encode service notice");
                0
            }
        }
    }

    /// Reclaim expired sessions and sessions left empty past the grace.
    pub fn sweep(&self, now: Instant) -> HubSweep {
        let mut report = HubSweep::default();
        let mut closing = Vec::new();
        let grace = self.config.vacancy_grace;

        self.sessions.retain(|_, entry| {
            if entry.is_expired(now) {
                closing.append(&mut entry.connections);
                report.expired += 1;
                return false;
            }
            let vacated = entry.connections.is_empty()
                && entry
                    .vacant_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= grace);
            if vacated {
                report.vacated += 1;
            }
            !vacated
        });

        for conn in &closing {
            let _ = conn.close(CloseReason::SessionExpired);
        }
        gauge!("hub_sessions_active").set(self.sessions.len() as f64);
        if report.expired + report.vacated > 0 {
            debug!(expired = report.expired, vacated = report.vacated, "hub sweep");
        }
        report
    }

    /// Run [`Hub::sweep`] every `interval` until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = hub.sweep(Instant::now());
                    }
                }
            }
        })
    }

    /// Remove a session and close its connections.
    pub fn teardown(&self, session_id: &SessionId) -> bool {
        let Some((_, entry)) = self.sessions.remove(session_id) else {
            return false;
        };
        for conn in &entry.connections {
            let _ = conn.close(CloseReason::Teardown);
        }
        gauge!("hub_sessions_active").set(self.sessions.len() as f64);
        info!(session_id = %session_id, connections = entry.connections.len(), "session torn down");
        true
    }

    /// Stop accepting attaches and put every connection into `Draining`.
    pub fn begin_drain(&self) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        let connections = self.all_connections();
        for conn in &connections {
            conn.begin_drain();
        }
        info!(connections = connections.len(), "hub draining");
    }

    /// Wait until every connection has detached, up to `grace`.
    ///
    /// Returns `false` if the grace elapsed first.
    pub async fn await_drained(&self, grace: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                let _ = notified.as_mut().enable();
                if self.live.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, drained).await.is_ok()
    }

    /// Close every connection immediately.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.all_connections()
            .iter()
            .filter(|conn| conn.close(reason))
            .count()
    }

    fn all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.sessions
            .iter()
            .flat_map(|entry| entry.connections.clone())
            .collect()
    }

    /// Whether draining has begun.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Attached connections, across all sessions.
    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Whether `session_id` is held in memory.
    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// When `session_id` last saw traffic in either direction.
    pub fn session_last_seen(&self, session_id: &SessionId) -> Option<Instant> {
        self.sessions.get(session_id).map(|entry| entry.last_seen)
    }

    /// Quiet time of the least recently active session.
    pub fn longest_quiet(&self, now: Instant) -> Option<Duration> {
        self.sessions
            .iter()
            .map(|entry| now.saturating_duration_since(entry.last_seen))
            .max()
    }

    /// Connections attached to `session_id`.
    pub fn session_connections(&self, session_id: &SessionId) -> Vec<Arc<ConnectionHandle>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.connections.clone())
            .unwrap_or_default()
    }
}
