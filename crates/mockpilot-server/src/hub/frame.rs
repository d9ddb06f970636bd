//! Client wire frames.
//!
//! Outbound: `{"seq", "kind", "session_id", "data"}` where `data` is the
//! already-serialized event body, shared across every connection of the
//! session. Inbound: a JSON object whose `kind` is `audio_chunk` or
//! `edit_request`; everything else about it is opaque to the relay.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::errors::HubError;

/// Kind discriminator on server → client frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// Speech-to-text output.
    Transcript,
    /// Extracted UI intent.
    Intent,
    /// Generated component.
    Artifact,
    /// Analytics result.
    Insight,
    /// Error surfaced to the client.
    Error,
    /// Upstream producer or bus unavailable / restored.
    ServiceDown,
    /// Generation request emitted by the trigger engine.
    Request,
    /// Backpressure notice: older events are being shed.
    Slow,
}

/// Shedding priority. Higher survives longer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Shed first.
    Low,
    /// Intents and requests.
    Normal,
    /// Transcripts, artifacts, errors and service notices.
    High,
    /// Control frames. Never shed, never counted against capacity.
    Control,
}

impl OutboundKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcript => "transcript",
            Self::Intent => "intent",
            Self::Artifact => "artifact",
            Self::Insight => "insight",
            Self::Error => "error",
            Self::ServiceDown => "service_down",
            Self::Request => "request",
            Self::Slow => "slow",
        }
    }

    /// Shedding priority for this kind.
    #[must_use]
    pub fn priority(self) -> Priority {
        match self {
            Self::Insight => Priority::Low,
            Self::Intent | Self::Request => Priority::Normal,
            Self::Transcript | Self::Artifact | Self::Error | Self::ServiceDown => Priority::High,
            Self::Slow => Priority::Control,
        }
    }
}

impl fmt::Display for OutboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized outbound frame.
#[derive(Debug, Serialize)]
pub struct WireFrame<'a> {
    /// Per-connection delivery sequence, starting at 1.
    pub seq: u64,
    /// Frame kind.
    pub kind: OutboundKind,
    /// Session the frame belongs to.
    pub session_id: &'a str,
    /// Event body.
    pub data: &'a RawValue,
}

/// Body of a `service_down` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNotice {
    /// Producer name, or `bus`.
    pub service: String,
    /// Current status.
    pub status: ServiceStatus,
    /// Human-readable explanation.
    pub message: String,
    /// When the status changed.
    pub since: DateTime<Utc>,
}

/// Status carried in a [`ServiceNotice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Service is unavailable.
    Down,
    /// Service recovered.
    Restored,
}

impl ServiceNotice {
    /// Notice that `service` went down.
    #[must_use]
    pub fn down(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: ServiceStatus::Down,
            message: message.into(),
            since: Utc::now(),
        }
    }

    /// Notice that `service` recovered.
    #[must_use]
    pub fn restored(service: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            message: format!("{service} is available again"),
            service,
            status: ServiceStatus::Restored,
            since: Utc::now(),
        }
    }
}

/// Body of an `error` frame sent to a single connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    pub error_code: String,
}

impl From<&HubError> for ErrorNotice {
    fn from(err: &HubError) -> Self {
        Self {
            message: err.to_string(),
            error_code: err.error_code().to_string(),
        }
    }
}

/// Serialize any body into a shareable raw JSON value.
pub fn to_raw<T: Serialize>(body: &T) -> Result<Arc<RawValue>, serde_json::Error> {
    let raw = serde_json::value::to_raw_value(body)?;
    Ok(Arc::from(raw))
}

/// Client → server frame kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundKind {
    /// Raw microphone audio for the speech-to-text producer.
    AudioChunk,
    /// Manual edit of a generated component.
    EditRequest,
}

impl InboundKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioChunk => "audio_chunk",
            Self::EditRequest => "edit_request",
        }
    }
}

#[derive(Deserialize)]
struct InboundProbe {
    kind: Option<String>,
}

/// Classify an inbound text frame without interpreting the rest of it.
pub fn classify_inbound(text: &str) -> Result<InboundKind, HubError> {
    let probe: InboundProbe =
        serde_json::from_str(text).map_err(|e| HubError::InvalidFrame(e.to_string()))?;
    match probe.kind.as_deref() {
        Some("audio_chunk") => Ok(InboundKind::AudioChunk),
        Some("edit_request") => Ok(InboundKind::EditRequest),
        Some(other) => Err(HubError::UnknownInboundKind(other.to_string())),
        None => Err(HubError::InvalidFrame("missing field `kind`".to_string())),
    }
}
