//! Signal events exchanged on the bus.
//!
//! Producers publish one flat JSON object per event. The envelope fields
//! (`schema_version`, `event_id`, `session_id`, `seq`, `emitted_at`,
//! `producer`) sit beside the payload fields, and `kind` selects which
//! payload shape applies:
//!
//! ```json
//! {"schema_version":"1.0","kind":"intent","session_id":"s1","seq":4,
//!  "utterance_id":"u9","component":"button","styles":["hover"],
//!  "brand_refs":["Stripe"],"confidence":0.83}
//! ```
//!
//! [`SignalEvent::parse`] is the only decoding entry point. Anything it
//! rejects is malformed input and never enters a debounce window or reaches
//! a client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ParseError;
use crate::ids::{EventId, SessionId};

/// Schema version stamped on everything this workspace emits.
pub const SCHEMA_VERSION: &str = "1.0";

/// Major schema version accepted on input.
pub const SUPPORTED_SCHEMA_MAJOR: u32 = 1;

/// Discriminator over the six event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Speech-to-text output for one utterance.
    Transcript,
    /// UI intent extracted from an utterance.
    Intent,
    /// Generated component code.
    Artifact,
    /// Sentiment / demographic analytics for a component.
    Analytics,
    /// Producer heartbeat.
    Liveness,
    /// Producer-side failure report.
    Error,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Transcript,
        Self::Intent,
        Self::Artifact,
        Self::Analytics,
        Self::Liveness,
        Self::Error,
    ];

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcript => "transcript",
            Self::Intent => "intent",
            Self::Artifact => "artifact",
            Self::Analytics => "analytics",
            Self::Liveness => "liveness",
            Self::Error => "error",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Producer assumed when an event does not name one.
    #[must_use]
    pub fn default_producer(self) -> &'static str {
        match self {
            Self::Transcript => "speech_to_text",
            Self::Intent => "intent_extractor",
            Self::Artifact => "code_generator",
            Self::Analytics => "sentiment_miner",
            Self::Liveness | Self::Error => "unknown",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transcribed utterance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptPayload {
    /// Message id assigned by the transcriber.
    #[serde(default)]
    pub msg_id: String,
    /// Utterance this text belongs to.
    pub utterance_id: String,
    /// Transcribed text.
    pub text: String,
    /// Utterance start, seconds from stream start.
    #[serde(default)]
    pub ts_start: f64,
    /// Utterance end, seconds from stream start.
    #[serde(default)]
    pub ts_end: f64,
    /// Diarized speaker label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Recognizer confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Silence observed after this utterance, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_gap_ms: Option<u64>,
}

/// Extracted UI intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentPayload {
    /// Utterance the intent was derived from.
    pub utterance_id: String,
    /// Component type, e.g. `button`.
    pub component: String,
    /// Style descriptors, e.g. `hover`, `pill`.
    #[serde(default)]
    pub styles: Vec<String>,
    /// Brand references, e.g. `Stripe`.
    #[serde(default)]
    pub brand_refs: Vec<String>,
    /// Optional interaction descriptor, e.g. `on_click_open_modal`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<String>,
    /// Extractor confidence.
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    /// Diarized speaker label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Source utterance text, when the extractor forwards it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Silence observed after the source utterance, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_gap_ms: Option<u64>,
}

fn full_confidence() -> f64 {
    1.0
}

impl Default for IntentPayload {
    fn default() -> Self {
        Self {
            utterance_id: String::new(),
            component: String::new(),
            styles: Vec::new(),
            brand_refs: Vec::new(),
            interaction: None,
            confidence: full_confidence(),
            speaker: None,
            text: None,
            silence_gap_ms: None,
        }
    }
}

/// Generated component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPayload {
    /// Design spec this artifact implements.
    pub spec_id: String,
    /// Component source.
    #[serde(default)]
    pub jsx: String,
    /// Tailwind class summary.
    #[serde(default)]
    pub tailwind: String,
    /// Exported symbol names.
    #[serde(default)]
    pub named_exports: Vec<String>,
    /// Whether the generated code passed lint.
    #[serde(default)]
    pub lint_passed: bool,
}

/// Analytics result. Inner structures are opaque to the relay.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsPayload {
    /// Design spec the analytics describe.
    pub spec_id: String,
    /// Sentiment label → count.
    #[serde(default)]
    pub sentiment_histogram: Value,
    /// Demographic slice → stats.
    #[serde(default)]
    pub demographic_breakdown: Value,
    /// Representative posts.
    #[serde(default)]
    pub top_posts: Vec<Value>,
}

/// Heartbeat. The producer is named by the envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessPayload {
    /// Producer's own heartbeat cadence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

/// Producer-reported failure.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message.
    pub message: String,
    /// Extra detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Kind-specific payload, tagged by `kind` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// See [`TranscriptPayload`].
    Transcript(TranscriptPayload),
    /// See [`IntentPayload`].
    Intent(IntentPayload),
    /// See [`ArtifactPayload`].
    Artifact(ArtifactPayload),
    /// See [`AnalyticsPayload`].
    Analytics(AnalyticsPayload),
    /// See [`LivenessPayload`].
    Liveness(LivenessPayload),
    /// See [`ErrorPayload`].
    Error(ErrorPayload),
}

impl EventPayload {
    /// The discriminator for this payload.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Transcript(_) => EventKind::Transcript,
            Self::Intent(_) => EventKind::Intent,
            Self::Artifact(_) => EventKind::Artifact,
            Self::Analytics(_) => EventKind::Analytics,
            Self::Liveness(_) => EventKind::Liveness,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// An immutable, versioned event from an upstream producer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// `major.minor`; only major 1 is accepted.
    pub schema_version: String,
    /// Producer-assigned id; minted on decode when absent.
    #[serde(default)]
    pub event_id: EventId,
    /// Session this event belongs to.
    pub session_id: SessionId,
    /// Sequence number within (kind, session), assigned by the producer.
    #[serde(default)]
    pub seq: u64,
    /// Emission time at the producer.
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
    /// Emitting service name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// Kind-specific fields.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl SignalEvent {
    /// Build an event stamped with the current schema version and time.
    #[must_use]
    pub fn new(session_id: impl Into<SessionId>, payload: EventPayload) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            event_id: EventId::new(),
            session_id: session_id.into(),
            seq: 0,
            emitted_at: Utc::now(),
            producer: None,
            payload,
        }
    }

    /// Set the per-kind sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// Name the emitting service.
    #[must_use]
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Decode and validate one bus payload.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Self::parse_with_hint(bytes, None)
    }

    /// Decode a payload from a channel that implies a kind.
    ///
    /// When the message omits `kind`, `hint` fills it in. An explicit `kind`
    /// always wins over the hint.
    pub fn parse_with_hint(bytes: &[u8], hint: Option<EventKind>) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        let value: Value = serde_json::from_str(text).map_err(ParseError::InvalidJson)?;
        let Value::Object(mut map) = value else {
            return Err(ParseError::NotAnObject);
        };

        let kind = match map.get("kind") {
            Some(Value::String(name)) => {
                EventKind::from_wire(name).ok_or_else(|| ParseError::UnknownKind(name.clone()))?
            }
            Some(other) => return Err(ParseError::UnknownKind(other.to_string())),
            None => {
                let kind = hint.ok_or(ParseError::MissingField("kind"))?;
                let _ = map.insert("kind".to_owned(), Value::from(kind.as_str()));
                kind
            }
        };

        let version = match map.get("schema_version") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(ParseError::UnsupportedSchemaVersion(other.to_string())),
            None => return Err(ParseError::MissingField("schema_version")),
        };
        if schema_major(&version) != Some(SUPPORTED_SCHEMA_MAJOR) {
            return Err(ParseError::UnsupportedSchemaVersion(version));
        }
        let _ = map.insert("schema_version".to_owned(), Value::String(version));

        if !map.contains_key("session_id") {
            return Err(ParseError::MissingField("session_id"));
        }

        let event: Self =
            serde_json::from_value(Value::Object(map)).map_err(|source| ParseError::Schema {
                kind: kind.as_str().to_owned(),
                source,
            })?;
        event.validate()?;
        Ok(event)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.session_id.is_blank() {
            return Err(ParseError::EmptySession);
        }
        if let Some(c) = self.confidence() {
            if !(0.0..=1.0).contains(&c) {
                return Err(ParseError::ConfidenceOutOfRange(c));
            }
        }
        if self.kind() == EventKind::Liveness
            && self.producer.as_deref().is_none_or(|p| p.trim().is_empty())
        {
            return Err(ParseError::MissingProducer);
        }
        Ok(())
    }

    /// Serialize to the flat wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The event's kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Confidence score, for kinds that carry one.
    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        match &self.payload {
            EventPayload::Transcript(t) => t.confidence,
            EventPayload::Intent(i) => Some(i.confidence),
            _ => None,
        }
    }

    /// Utterance back-reference, for kinds derived from speech.
    #[must_use]
    pub fn utterance_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Transcript(t) => Some(&t.utterance_id),
            EventPayload::Intent(i) => Some(&i.utterance_id),
            _ => None,
        }
    }

    /// Spoken text, when the event carries it.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Transcript(t) => Some(&t.text),
            EventPayload::Intent(i) => i.text.as_deref(),
            _ => None,
        }
    }

    /// Explicit silence gap following the source utterance.
    #[must_use]
    pub fn silence_gap(&self) -> Option<Duration> {
        match &self.payload {
            EventPayload::Transcript(t) => t.silence_gap_ms.map(Duration::from_millis),
            EventPayload::Intent(i) => i.silence_gap_ms.map(Duration::from_millis),
            _ => None,
        }
    }

    /// Intent payload, if this is an intent.
    #[must_use]
    pub fn as_intent(&self) -> Option<&IntentPayload> {
        match &self.payload {
            EventPayload::Intent(i) => Some(i),
            _ => None,
        }
    }

    /// Named producer, or the conventional producer for this kind.
    #[must_use]
    pub fn producer_name(&self) -> &str {
        match self.producer.as_deref() {
            Some(p) if !p.trim().is_empty() => p,
            _ => self.kind().default_producer(),
        }
    }
}

fn schema_major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}
