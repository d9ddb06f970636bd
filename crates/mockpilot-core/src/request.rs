//! Generation requests emitted by the trigger engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::SCHEMA_VERSION;
use crate::ids::{EventId, RequestId, SessionId};

/// A consolidated, deduplicated request for the downstream generator.
///
/// Published on the generation-request channel; the relay never calls the
/// generator itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Always [`SCHEMA_VERSION`] when emitted here.
    pub schema_version: String,
    /// Unique id for this request.
    pub request_id: RequestId,
    /// Originating session.
    pub session_id: SessionId,
    /// Resolved component type.
    pub component: String,
    /// Resolved style descriptors.
    pub styles: Vec<String>,
    /// Resolved brand references.
    pub brand_refs: Vec<String>,
    /// Resolved interaction descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<String>,
    /// Hex digest of the normalized attributes; the dedup key.
    pub fingerprint: String,
    /// Events that justified this request, firing intent first.
    pub source_event_ids: Vec<EventId>,
    /// When the engine emitted the request.
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// Start a request with a fresh id and timestamp.
    #[must_use]
    pub fn new(session_id: SessionId, component: impl Into<String>, fingerprint: String) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            request_id: RequestId::new(),
            session_id,
            component: component.into(),
            styles: Vec::new(),
            brand_refs: Vec::new(),
            interaction: None,
            fingerprint,
            source_event_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
