//! Malformed-input error taxonomy.
//!
//! Every way an inbound bus message can fail decoding maps to one
//! [`ParseError`] variant. Callers log and drop; these never reach clients.

use thiserror::Error;

/// Why a bus payload could not be decoded into a [`crate::SignalEvent`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// Payload bytes are not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// Payload is not syntactically valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Top-level JSON value is not an object.
    #[error("payload must be a JSON object")]
    NotAnObject,

    /// A required envelope field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The `kind` discriminator is present but not a known event kind.
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),

    /// `schema_version` has a major version this build does not understand.
    #[error("unsupported schema_version `{0}`")]
    UnsupportedSchemaVersion(String),

    /// `session_id` is empty or whitespace.
    #[error("session_id is empty")]
    EmptySession,

    /// A confidence score lies outside `[0, 1]` (or is NaN).
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    /// A liveness event that does not name its producer.
    #[error("liveness event without producer")]
    MissingProducer,

    /// Fields are present but have the wrong shape for the kind.
    #[error("payload does not match `{kind}` schema: {source}")]
    Schema {
        /// Event kind the payload claimed to be.
        kind: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl ParseError {
    /// Short stable label for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotUtf8 => "not_utf8",
            Self::InvalidJson(_) => "invalid_json",
            Self::NotAnObject => "not_object",
            Self::MissingField(_) => "missing_field",
            Self::UnknownKind(_) => "unknown_kind",
            Self::UnsupportedSchemaVersion(_) => "schema_version",
            Self::EmptySession => "empty_session",
            Self::ConfidenceOutOfRange(_) => "confidence_range",
            Self::MissingProducer => "missing_producer",
            Self::Schema { .. } => "schema",
        }
    }
}
