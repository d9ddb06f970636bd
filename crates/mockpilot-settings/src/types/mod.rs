//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it overrides. Each type's [`Default`] carries the
//! production value.

mod pipeline;
mod server;

pub use pipeline::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "trigger": { "confidenceThreshold": 0.8 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MockpilotSettings {
    /// Listener and WebSocket keepalive.
    pub server: ServerSettings,
    /// Fan-out hub.
    pub hub: HubSettings,
    /// Debounce/trigger engine.
    pub trigger: TriggerSettings,
    /// Pub/sub bus.
    pub bus: BusSettings,
    /// Session credential verification.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl MockpilotSettings {
    /// Correct out-of-range values in place.
    ///
    /// Called during loading. Bad values are clamped with a warning rather
    /// than rejected.
    pub fn validate(&mut self) {
        fn clamp_ratio(val: &mut f64, name: &str) {
            if !(0.0..=1.0).contains(val) {
                let clamped = if val.is_nan() { 0.0 } else { val.clamp(0.0, 1.0) };
                tracing::warn!("{name} out of range ({val}), clamped to {clamped}");
                *val = clamped;
            }
        }

        fn at_least<T: PartialOrd + Copy + std::fmt::Display>(val: &mut T, min: T, name: &str) {
            if *val < min {
                tracing::warn!("{name} below minimum ({val}), raised to {min}");
                *val = min;
            }
        }

        clamp_ratio(&mut self.trigger.confidence_threshold, "confidence_threshold");
        clamp_ratio(&mut self.bus.backoff.jitter_factor, "jitter_factor");

        at_least(&mut self.trigger.shards, 1, "trigger.shards");
        at_least(&mut self.trigger.shard_queue_capacity, 1, "trigger.shard_queue_capacity");
        at_least(&mut self.trigger.horizon_ms, 1, "trigger.horizon_ms");
        at_least(&mut self.trigger.sweep_interval_ms, 1, "trigger.sweep_interval_ms");
        at_least(&mut self.hub.queue_max_messages, 2, "hub.queue_max_messages");
        at_least(&mut self.hub.queue_max_bytes, 1024, "hub.queue_max_bytes");
        at_least(&mut self.hub.liveness_interval_ms, 1, "hub.liveness_interval_ms");
        at_least(&mut self.hub.liveness_max_missed, 1, "hub.liveness_max_missed");
        at_least(&mut self.hub.sweep_interval_ms, 1, "hub.sweep_interval_ms");
        at_least(&mut self.server.ws_ping_interval_ms, 1, "server.ws_ping_interval_ms");
        at_least(&mut self.bus.capacity, 16, "bus.capacity");
        at_least(&mut self.bus.backoff.base_delay_ms, 1, "bus.backoff.base_delay_ms");

        let backoff = &mut self.bus.backoff;
        if backoff.max_delay_ms < backoff.base_delay_ms {
            tracing::warn!(
                "bus backoff max_delay_ms ({}) < base_delay_ms ({}), correcting",
                backoff.max_delay_ms,
                backoff.base_delay_ms
            );
            backoff.max_delay_ms = backoff.base_delay_ms;
        }

        if self.server.ws_pong_timeout_ms < self.server.ws_ping_interval_ms {
            tracing::warn!(
                "ws_pong_timeout_ms ({}) < ws_ping_interval_ms ({}), correcting",
                self.server.ws_pong_timeout_ms,
                self.server.ws_ping_interval_ms
            );
            self.server.ws_pong_timeout_ms = self.server.ws_ping_interval_ms;
        }

        if !matches!(self.auth.jwt_algorithm.as_str(), "HS256" | "HS384" | "HS512") {
            tracing::warn!(
                algorithm = %self.auth.jwt_algorithm,
                "unsupported jwt algorithm, falling back to HS256"
            );
            self.auth.jwt_algorithm = "HS256".to_string();
        }

        self.trigger.cue_phrases = self
            .trigger
            .cue_phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = MockpilotSettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.server.ws_ping_interval_ms, 25_000);
        assert_eq!(s.server.drain_grace_ms, 5_000);
        assert_eq!(s.hub.session_ttl_ms, 7_200_000);
        assert_eq!(s.hub.sweep_interval_ms, 30_000);
        assert_eq!(s.hub.queue_max_messages, 256);
        assert_eq!(s.hub.queue_max_bytes, 1_048_576);
        assert_eq!(s.hub.liveness_interval_ms, 10_000);
        assert_eq!(s.hub.liveness_max_missed, 2);
        assert_eq!(s.trigger.horizon_ms, 5_000);
        assert_eq!(s.trigger.silence_threshold_ms, 1_500);
        assert!((s.trigger.confidence_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(s.trigger.shards, 8);
        assert!(s.trigger.cue_phrases.iter().any(|p| p == "let's build"));
        assert_eq!(s.bus.channels.generation_requests, "generation_requests");
        assert_eq!(s.bus.backoff.base_delay_ms, 250);
        assert_eq!(s.bus.backoff.max_delay_ms, 30_000);
        assert_eq!(s.bus.hold_buffer, 64);
        assert_eq!(s.auth.jwt_algorithm, "HS256");
        assert!(s.auth.uses_dev_secret());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = serde_json::json!({
            "server": { "port": 9100 },
            "trigger": { "confidenceThreshold": 0.9 },
            "bus": { "backoff": { "maxDelayMs": 5000 } }
        });
        let s: MockpilotSettings = serde_json::from_value(json).unwrap();
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.host, "0.0.0.0");
        assert!((s.trigger.confidence_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(s.trigger.horizon_ms, 5_000);
        assert_eq!(s.bus.backoff.max_delay_ms, 5_000);
        assert_eq!(s.bus.backoff.base_delay_ms, 250);
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(MockpilotSettings::default()).unwrap();
        assert!(v["hub"].get("sessionTtlMs").is_some());
        assert!(v["bus"]["channels"].get("generationRequests").is_some());
        assert!(v["auth"].get("issuer").is_none());
    }

    #[test]
    fn validate_clamps_ratios() {
        let mut s = MockpilotSettings::default();
        s.trigger.confidence_threshold = 1.7;
        s.bus.backoff.jitter_factor = -0.3;
        s.validate();
        assert!((s.trigger.confidence_threshold - 1.0).abs() < f64::EPSILON);
        assert!(s.bus.backoff.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn validate_raises_minimums() {
        let mut s = MockpilotSettings::default();
        s.trigger.shards = 0;
        s.hub.queue_max_messages = 0;
        s.hub.liveness_max_missed = 0;
        s.validate();
        assert_eq!(s.trigger.shards, 1);
        assert_eq!(s.hub.queue_max_messages, 2);
        assert_eq!(s.hub.liveness_max_missed, 1);
    }

    #[test]
    fn validate_corrects_inversions() {
        let mut s = MockpilotSettings::default();
        s.bus.backoff.base_delay_ms = 2_000;
        s.bus.backoff.max_delay_ms = 100;
        s.server.ws_pong_timeout_ms = 10;
        s.validate();
        assert_eq!(s.bus.backoff.max_delay_ms, 2_000);
        assert_eq!(s.server.ws_pong_timeout_ms, s.server.ws_ping_interval_ms);
    }

    #[test]
    fn validate_normalizes_cue_phrases() {
        let mut s = MockpilotSettings::default();
        s.trigger.cue_phrases = vec!["  Ship It ".into(), String::new(), "go ahead".into()];
        s.validate();
        assert_eq!(s.trigger.cue_phrases, vec!["ship it", "go ahead"]);
    }

    #[test]
    fn validate_rejects_asymmetric_algorithm() {
        let mut s = MockpilotSettings::default();
        s.auth.jwt_algorithm = "RS256".into();
        s.validate();
        assert_eq!(s.auth.jwt_algorithm, "HS256");
    }

    #[test]
    fn validate_preserves_defaults() {
        let mut s = MockpilotSettings::default();
        s.validate();
        assert_eq!(s, MockpilotSettings::default());
    }

    #[test]
    fn channel_kind_hints() {
        use mockpilot_core::events::EventKind;
        let c = BusChannels::default();
        assert_eq!(c.kind_hint("components"), Some(EventKind::Artifact));
        assert_eq!(c.kind_hint("insights"), Some(EventKind::Analytics));
        assert_eq!(c.kind_hint("heartbeats"), Some(EventKind::Liveness));
        assert_eq!(c.kind_hint("generation_requests"), None);
        assert_eq!(c.signal_channels(), vec!["transcripts", "intents"]);
        assert_eq!(c.client_event_channels().len(), 6);
    }
}
