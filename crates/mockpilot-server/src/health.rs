//! `/health` endpoint.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` during shutdown.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Attached client connections.
    pub connections: usize,
    /// Sessions held by the hub.
    pub active_sessions: usize,
    /// Seconds since the least recently active session saw traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longest_session_quiet_secs: Option<u64>,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    sessions: usize,
    longest_quiet: Option<Duration>,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions: sessions,
        longest_session_quiet_secs: longest_quiet.map(|d| d.as_secs()),
    }
}
