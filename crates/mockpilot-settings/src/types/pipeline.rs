//! Settings for the coordination core: hub, trigger engine, and bus.

use std::time::Duration;

use mockpilot_core::events::EventKind;
use mockpilot_core::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};

/// Session fan-out hub settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Session lifetime from creation.
    pub session_ttl_ms: u64,
    /// Eager reclamation cadence.
    pub sweep_interval_ms: u64,
    /// Outbound queue capacity in messages.
    pub queue_max_messages: usize,
    /// Outbound queue capacity in serialized bytes.
    pub queue_max_bytes: usize,
    /// Producer liveness check cadence.
    pub liveness_interval_ms: u64,
    /// Consecutive missed intervals before a producer is reported down.
    pub liveness_max_missed: u32,
    /// Producers tracked from startup, before they are first heard from.
    pub expected_producers: Vec<String>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            session_ttl_ms: 2 * 60 * 60 * 1000,
            sweep_interval_ms: 30_000,
            queue_max_messages: 256,
            queue_max_bytes: 1_048_576,
            liveness_interval_ms: 10_000,
            liveness_max_missed: 2,
            expected_producers: Vec::new(),
        }
    }
}

impl HubSettings {
    /// Session TTL.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    /// Sweep cadence.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Liveness cadence.
    #[must_use]
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

/// Debounce/trigger engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerSettings {
    /// Sliding window length and fingerprint lifetime.
    pub horizon_ms: u64,
    /// Silence gap that counts as a conversational boundary.
    pub silence_threshold_ms: u64,
    /// Minimum intent confidence to fire.
    pub confidence_threshold: f64,
    /// Phrases that mark a boundary and override the silence requirement.
    pub cue_phrases: Vec<String>,
    /// Number of single-writer shard workers.
    pub shards: usize,
    /// Per-shard inbox capacity.
    pub shard_queue_capacity: usize,
    /// Idle time after which a session window is dropped.
    pub session_ttl_ms: u64,
    /// Eager sweep cadence per shard.
    pub sweep_interval_ms: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            horizon_ms: 5_000,
            silence_threshold_ms: 1_500,
            confidence_threshold: 0.75,
            cue_phrases: [
                "let's build",
                "let's make",
                "let's use",
                "let's add",
                "go ahead",
                "build it",
                "mock it up",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            shards: 8,
            shard_queue_capacity: 1024,
            session_ttl_ms: 2 * 60 * 60 * 1000,
            sweep_interval_ms: 30_000,
        }
    }
}

impl TriggerSettings {
    /// Debounce horizon.
    #[must_use]
    pub fn horizon(&self) -> Duration {
        Duration::from_millis(self.horizon_ms)
    }

    /// Silence threshold.
    #[must_use]
    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    /// Window TTL.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    /// Sweep cadence.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Named bus channels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusChannels {
    /// Speech-to-text output.
    pub transcripts: String,
    /// Extracted intents.
    pub intents: String,
    /// Generated components.
    pub components: String,
    /// Analytics results.
    pub insights: String,
    /// Trigger engine output.
    pub generation_requests: String,
    /// Producer error reports.
    pub errors: String,
    /// Producer liveness heartbeats.
    pub heartbeats: String,
    /// Client audio forwarded upstream.
    pub audio_chunks: String,
    /// Client edit requests forwarded upstream.
    pub edit_requests: String,
}

impl Default for BusChannels {
    fn default() -> Self {
        Self {
            transcripts: "transcripts".to_string(),
            intents: "intents".to_string(),
            components: "components".to_string(),
            insights: "insights".to_string(),
            generation_requests: "generation_requests".to_string(),
            errors: "errors".to_string(),
            heartbeats: "heartbeats".to_string(),
            audio_chunks: "audio_chunks".to_string(),
            edit_requests: "edit_requests".to_string(),
        }
    }
}

impl BusChannels {
    /// Event kind implied by a channel, for producers that omit `kind`.
    #[must_use]
    pub fn kind_hint(&self, channel: &str) -> Option<EventKind> {
        [
            (&self.transcripts, EventKind::Transcript),
            (&self.intents, EventKind::Intent),
            (&self.components, EventKind::Artifact),
            (&self.insights, EventKind::Analytics),
            (&self.errors, EventKind::Error),
            (&self.heartbeats, EventKind::Liveness),
        ]
        .into_iter()
        .find_map(|(name, kind)| (name == channel).then_some(kind))
    }

    /// Channels the trigger engine consumes.
    #[must_use]
    pub fn signal_channels(&self) -> Vec<String> {
        vec![self.transcripts.clone(), self.intents.clone()]
    }

    /// Channels carrying signal events relayed to clients.
    #[must_use]
    pub fn client_event_channels(&self) -> Vec<String> {
        vec![
            self.transcripts.clone(),
            self.intents.clone(),
            self.components.clone(),
            self.insights.clone(),
            self.errors.clone(),
            self.heartbeats.clone(),
        ]
    }
}

/// Bus connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Channel names.
    pub channels: BusChannels,
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,
    /// Messages held while the bus is unavailable.
    pub hold_buffer: usize,
    /// In-process broker capacity before slow subscribers lag.
    pub capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            channels: BusChannels::default(),
            backoff: BackoffPolicy::default(),
            hold_buffer: 64,
            capacity: 4096,
        }
    }
}
