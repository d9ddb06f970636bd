//! WebSocket session lifecycle: one attached client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, instrument, warn};

use crate::errors::HubError;
use crate::hub::Hub;
use crate::hub::connection::{CloseReason, ConnectionHandle};

/// Ping cadence for one connection.
#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// How long to wait for a Pong before considering the client dead.
    pub pong_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

/// Build a close frame.
pub fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    }))
}

/// Close a socket that never attached.
pub async fn reject(mut ws: WebSocket, code: u16, reason: &'static str) {
    let _ = ws.send(close_message(code, reason)).await;
    debug!(code, reason, "handshake rejected");
}

/// Run an attached connection.
///
/// 1. Moves the handle to `Active`
/// 2. Writes queued frames in order, pinging every interval
/// 3. Forwards inbound text frames to the hub, answering failures with an
///    `error` frame on this connection only
/// 4. Closes with the handle's close code when the hub ends the connection
/// 5. Detaches on disconnect
#[instrument(skip_all, fields(session_id = %handle.session_id, connection_id = %handle.id))]
pub async fn run_ws_session(
    ws: WebSocket,
    handle: Arc<ConnectionHandle>,
    hub: Arc<Hub>,
    timing: SessionTiming,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let connection_start = std::time::Instant::now();
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);
    handle.activate();

    let writer = Arc::clone(&handle);
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(timing.ping_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = writer.next_frame() => {
                    if let Some(text) = frame {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    } else {
                        let reason = writer.close_reason().unwrap_or(CloseReason::ClientGone);
                        if reason != CloseReason::ClientGone {
                            let _ = ws_tx
                                .send(close_message(reason.close_code(), reason.as_str()))
                                .await;
                        }
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !writer.check_alive() && writer.last_pong_elapsed() > timing.pong_timeout {
                        warn!("client unresponsive for {:?}, disconnecting", timing.pong_timeout);
                        let reason = CloseReason::Unresponsive;
                        let _ = writer.close(reason);
                        let _ = ws_tx.send(close_message(reason.close_code(), reason.as_str())).await;
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut outbound => break,
        };
        let Some(Ok(msg)) = msg else { break };

        let text = match msg {
            Message::Text(t) => Some(t.to_string()),
            Message::Binary(data) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    Some(s.to_string())
                } else {
                    let _ = handle.send_error(&HubError::InvalidFrame(
                        "binary frames must carry UTF-8 JSON".into(),
                    ));
                    None
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                handle.mark_alive();
                None
            }
        };

        let Some(text) = text else { continue };
        handle.mark_alive();

        if let Err(e) = hub.deliver_inbound(&handle, &text).await {
            debug!(error = %e, "inbound frame rejected");
            let _ = handle.send_error(&e);
        }
    }

    hub.detach(&handle);
    outbound.abort();

    let duration = connection_start.elapsed();
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(duration.as_secs_f64());
    info!(
        duration_secs = duration.as_secs(),
        delivered = handle.delivered_count(),
        dropped = handle.drop_count(),
        "client disconnected"
    );
}
