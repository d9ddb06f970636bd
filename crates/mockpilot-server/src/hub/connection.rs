//! Per-connection state: lifecycle, outbound queue, delivery sequence and
//! ping/pong liveness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use mockpilot_core::{ConnectionId, SessionId};
use parking_lot::Mutex;
use serde_json::value::RawValue;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::frame::{ErrorNotice, OutboundKind, WireFrame, to_raw};
use super::queue::{OutboundQueue, QueuedFrame};
use crate::errors::HubError;

/// Connection lifecycle.
///
/// ```text
/// Connecting ──▶ Active ──▶ Draining ──▶ Closed
///      │            │                      ▲
///      └────────────┴──────────────────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attached, writer not started yet.
    Connecting,
    /// Exchanging frames.
    Active,
    /// Flushing the queue before a server restart. Inbound frames rejected.
    Draining,
    /// Finished. Nothing more is sent.
    Closed,
}

/// Why a connection was closed by the server side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away.
    ClientGone,
    /// The session was torn down.
    Teardown,
    /// The session outlived its TTL.
    SessionExpired,
    /// The server is restarting.
    ServerRestart,
    /// No pong within the timeout.
    Unresponsive,
}

impl CloseReason {
    /// WebSocket close code.
    #[must_use]
    pub fn close_code(self) -> u16 {
        match self {
            Self::ClientGone | Self::Teardown => 1000,
            Self::Unresponsive => 1001,
            Self::ServerRestart => 1012,
            Self::SessionExpired => 4403,
        }
    }

    /// Close frame reason text.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientGone => "client_gone",
            Self::Teardown => "session_closed",
            Self::SessionExpired => "session_expired",
            Self::ServerRestart => "server_restart",
            Self::Unresponsive => "unresponsive",
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    reason: Option<CloseReason>,
}

/// A client connection attached to one session.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Session this connection is attached to.
    pub session_id: SessionId,
    /// When the connection attached.
    pub connected_at: Instant,
    lifecycle: Mutex<Lifecycle>,
    queue: Mutex<OutboundQueue>,
    wake: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    detached: AtomicBool,
}

impl ConnectionHandle {
    /// Create a handle with a queue bounded by `max_messages` / `max_bytes`.
    #[must_use]
    pub fn new(session_id: SessionId, max_messages: usize, max_bytes: usize) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            session_id,
            connected_at: now,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Connecting,
                reason: None,
            }),
            queue: Mutex::new(OutboundQueue::new(max_messages, max_bytes)),
            wake: Notify::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            detached: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    /// Reason for closing, once closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lifecycle.lock().reason
    }

    /// Whether the connection has not reached `Closed`.
    pub fn is_open(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// `Connecting → Active`. No effect in any other state.
    pub fn activate(&self) {
        let mut lc = self.lifecycle.lock();
        if lc.state == ConnectionState::Connecting {
            lc.state = ConnectionState::Active;
        }
    }

    /// Enter `Draining`. The writer closes once the queue is empty.
    pub fn begin_drain(&self) {
        {
            let mut lc = self.lifecycle.lock();
            if matches!(lc.state, ConnectionState::Connecting | ConnectionState::Active) {
                lc.state = ConnectionState::Draining;
            }
        }
        self.wake.notify_one();
    }

    /// Close immediately, discarding anything queued.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut lc = self.lifecycle.lock();
            if lc.state == ConnectionState::Closed {
                return false;
            }
            lc.state = ConnectionState::Closed;
            lc.reason = Some(reason);
        }
        self.queue.lock().clear();
        self.wake.notify_one();
        debug!(connection_id = %self.id, reason = reason.as_str(), "connection closed");
        true
    }

    /// Queue an event frame. Returns `false` if it was not queued.
    ///
    /// New events are refused once draining starts.
    pub fn enqueue(&self, kind: OutboundKind, data: Arc<RawValue>) -> bool {
        if !matches!(self.state(), ConnectionState::Connecting | ConnectionState::Active) {
            return false;
        }
        self.push(QueuedFrame::new(kind, data))
    }

    /// Queue an `error` frame for this connection only.
    pub fn send_error(&self, err: &HubError) -> bool {
        if !self.is_open() {
            return false;
        }
        match to_raw(&ErrorNotice::from(err)) {
            Ok(data) => self.push(QueuedFrame::new(OutboundKind::Error, data)),
            Err(e) => {
                warn!(error = %e, "failed to encode error frame");
                false
            }
        }
    }

    fn push(&self, frame: QueuedFrame) -> bool {
        let kind = frame.kind;
        let outcome = {
            let mut queue = self.queue.lock();
            let outcome = queue.push(frame);
            if outcome.slow_notice {
                let notice = serde_json::json!({
                    "message": "client is falling behind; older events are being dropped",
                    "dropped_total": queue.shed_total(),
                });
                match to_raw(&notice) {
                    Ok(data) => queue.push_control(QueuedFrame::new(OutboundKind::Slow, data)),
                    Err(e) => warn!(error = %e, "failed to encode slow notice"),
                }
            }
            outcome
        };

        let lost = outcome.shed + usize::from(!outcome.accepted);
        if lost > 0 {
            let _ = self.dropped.fetch_add(lost as u64, Ordering::Relaxed);
            counter!("hub_frames_shed_total").increment(lost as u64);
        }
        if outcome.slow_notice {
            counter!("hub_slow_notices_total").increment(1);
            debug!(connection_id = %self.id, %kind, "slow client, shedding");
        }
        self.wake.notify_one();
        outcome.accepted
    }

    /// Wait for the next frame to write, already serialized.
    ///
    /// Returns `None` once the connection is closed, or once a draining
    /// connection has flushed its queue (which closes it).
    pub async fn next_frame(&self) -> Option<String> {
        loop {
            if self.state() == ConnectionState::Closed {
                return None;
            }
            let popped = self.queue.lock().pop();
            if let Some(frame) = popped {
                match self.render(&frame) {
                    Ok(text) => return Some(text),
                    Err(e) => {
                        warn!(error = %e, kind = %frame.kind, "dropping unencodable frame");
                        continue;
                    }
                }
            }
            if self.state() == ConnectionState::Draining {
                let _ = self.close(CloseReason::ServerRestart);
                return None;
            }
            self.wake.notified().await;
        }
    }

    fn render(&self, frame: &QueuedFrame) -> Result<String, serde_json::Error> {
        let seq = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        serde_json::to_string(&WireFrame {
            seq,
            kind: frame.kind,
            session_id: self.session_id.as_str(),
            data: &frame.data,
        })
    }

    /// Frames handed to the writer so far.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames shed or rejected by backpressure.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames waiting to be written.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns `true` only for the first call.
    pub(crate) fn mark_detached(&self) -> bool {
        !self.detached.swap(true, Ordering::AcqRel)
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or attach).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}
