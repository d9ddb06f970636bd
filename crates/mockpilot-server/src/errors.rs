//! Hub error types.

use mockpilot_bus::BusError;
use mockpilot_core::SessionId;

/// Errors from hub operations on behalf of one connection.
///
/// None of these are fatal: they are reported to the offending connection as
/// an `error` frame and the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The session is not known to the hub.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session outlived its TTL.
    #[error("session expired: {0}")]
    SessionExpired(SessionId),

    /// The connection or hub is shutting down.
    #[error("server is draining, inbound frames are rejected")]
    Draining,

    /// Inbound frame with a `kind` the relay does not forward.
    #[error("unsupported inbound kind: {0}")]
    UnknownInboundKind(String),

    /// Inbound frame that is not a JSON object with a `kind`.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Inbound frame over the configured size limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Received size.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Forwarding to the bus failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HubError {
    /// Machine-readable code carried in `error` frames.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExpired(_) => "session_expired",
            Self::Draining => "draining",
            Self::UnknownInboundKind(_) => "unknown_kind",
            Self::InvalidFrame(_) => "invalid_frame",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::Bus(_) => "bus_error",
            Self::Serialize(_) => "internal_error",
        }
    }
}
