//! Debounce/trigger engine.
//!
//! Per session, the engine keeps a sliding window of recent transcript and
//! intent events and decides on each [`DebounceEngine::ingest`] whether the
//! newest event should become a [`GenerationRequest`].
//!
//! A request fires when all of these hold:
//!
//! 1. the newest event is an intent with confidence ≥ the threshold
//! 2. a conversational boundary has been seen since the session's last
//!    request, or the intent itself carries a cue phrase
//! 3. no unexpired request with the same fingerprint exists for the session
//!
//! Boundaries come from an explicit `silence_gap_ms` at or over the
//! threshold, a cue phrase in the event text, or an arrival gap at or over
//! the threshold since the previous event of the session.
//!
//! The engine is single-threaded by construction (`&mut self`); the service
//! layer guarantees one writer per session.

mod fingerprint;
mod window;

pub use fingerprint::{NormalizedAttrs, fingerprint};

use std::collections::HashMap;
use std::time::Duration;

use metrics::counter;
use mockpilot_core::events::{EventKind, IntentPayload};
use mockpilot_core::{GenerationRequest, SessionId, SignalEvent};
use mockpilot_settings::TriggerSettings;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::errors::TriggerError;
use window::{Buffered, DebounceWindow};

/// Engine tuning.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Buffer horizon and fingerprint lifetime.
    pub horizon: Duration,
    /// Silence gap that counts as a boundary.
    pub silence_threshold: Duration,
    /// Minimum intent confidence.
    pub confidence_threshold: f64,
    /// Lowercased cue phrases.
    pub cue_phrases: Vec<String>,
    /// Idle time after which a window is discarded.
    pub session_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&TriggerSettings::default())
    }
}

impl From<&TriggerSettings> for EngineConfig {
    fn from(s: &TriggerSettings) -> Self {
        Self {
            horizon: s.horizon(),
            silence_threshold: s.silence_threshold(),
            confidence_threshold: s.confidence_threshold,
            cue_phrases: s.cue_phrases.iter().map(|p| p.to_lowercase()).collect(),
            session_ttl: s.session_ttl(),
        }
    }
}

/// Outcome of [`DebounceEngine::sweep`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Windows dropped for exceeding the TTL.
    pub windows_dropped: usize,
    /// Buffered events evicted past the horizon.
    pub events_evicted: usize,
    /// Fingerprints expired.
    pub fingerprints_expired: usize,
}

/// Session-partitioned debounce state machine.
#[derive(Debug)]
pub struct DebounceEngine {
    config: EngineConfig,
    windows: HashMap<SessionId, DebounceWindow>,
}

impl DebounceEngine {
    /// Create an engine with no sessions.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sessions with a live window.
    pub fn session_count(&self) -> usize {
        self.windows.len()
    }

    /// Whether `session` currently has a window.
    pub fn has_session(&self, session: &str) -> bool {
        self.windows.contains_key(session)
    }

    /// Feed one event observed at `now`.
    ///
    /// Returns zero or one request. Malformed events are rejected before
    /// touching any window. Kinds other than transcript and intent carry no
    /// trigger signal and are ignored.
    pub fn ingest(
        &mut self,
        event: SignalEvent,
        now: Instant,
    ) -> Result<Vec<GenerationRequest>, TriggerError> {
        event.validate()?;

        let kind = event.kind();
        if !matches!(kind, EventKind::Transcript | EventKind::Intent) {
            debug!(session_id = %event.session_id, %kind, "ignoring non-signal event");
            return Ok(Vec::new());
        }
        counter!("trigger_events_total", "kind" => kind.as_str()).increment(1);

        let config = &self.config;
        let window = self
            .windows
            .entry(event.session_id.clone())
            .or_insert_with(|| DebounceWindow::new(now));

        if window.is_stale(now, config.session_ttl) {
            info!(session_id = %event.session_id, "session window expired, starting fresh");
            *window = DebounceWindow::new(now);
        }

        // measured before eviction: a pause past the horizon empties the buffer
        let inferred_gap = window
            .gap_since_last_event(now)
            .is_some_and(|gap| gap >= config.silence_threshold);

        let _ = window.evict(now, config.horizon);
        let _ = window.expire_fingerprints(now);

        let carries_cue = contains_cue(event.text(), &config.cue_phrases);
        let explicit_gap = event
            .silence_gap()
            .is_some_and(|gap| gap >= config.silence_threshold);

        if carries_cue || explicit_gap || inferred_gap {
            debug!(
                session_id = %event.session_id,
                carries_cue,
                explicit_gap,
                inferred_gap,
                "boundary observed"
            );
            window.mark_boundary(now);
        }

        window.push(event, now);

        let Some(newest) = window.buffer.back() else {
            return Ok(Vec::new());
        };
        let Some(intent) = newest.event.as_intent() else {
            return Ok(Vec::new());
        };
        if intent.confidence < config.confidence_threshold {
            debug!(
                session_id = %newest.event.session_id,
                confidence = intent.confidence,
                "intent below confidence threshold"
            );
            return Ok(Vec::new());
        }
        if !(window.boundary_since_request() || carries_cue) {
            debug!(session_id = %newest.event.session_id, "no boundary since last request");
            return Ok(Vec::new());
        }

        let request = resolve_request(&window.buffer, &newest.event, intent);
        if window.has_live_fingerprint(&request.fingerprint, now) {
            counter!("trigger_suppressed_total").increment(1);
            debug!(
                session_id = %request.session_id,
                fingerprint = %request.fingerprint,
                "duplicate request suppressed"
            );
            return Ok(Vec::new());
        }

        window.record_request(request.fingerprint.clone(), now, config.horizon);
        counter!("trigger_requests_total").increment(1);
        info!(
            session_id = %request.session_id,
            request_id = %request.request_id,
            component = %request.component,
            sources = request.source_event_ids.len(),
            "generation request fired"
        );
        Ok(vec![request])
    }

    /// Eager reclamation: drop stale windows, evict old events, expire fingerprints.
    pub fn sweep(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let ttl = self.config.session_ttl;
        let horizon = self.config.horizon;

        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_stale(now, ttl));
        report.windows_dropped = before - self.windows.len();

        for window in self.windows.values_mut() {
            report.events_evicted += window.evict(now, horizon);
            report.fingerprints_expired += window.expire_fingerprints(now);
        }

        if report.windows_dropped > 0 {
            debug!(dropped = report.windows_dropped, "swept stale trigger windows");
        }
        report
    }
}

fn contains_cue(text: Option<&str>, cues: &[String]) -> bool {
    let Some(text) = text else {
        return false;
    };
    // normalize curly apostrophes from speech-to-text output
    let text = text.to_lowercase().replace('\u{2019}', "'");
    cues.iter().any(|cue| text.contains(cue.as_str()))
}

/// Latest-wins attribute merge over the buffer.
///
/// The newest intent decides the component. Empty style/brand lists and a
/// missing interaction inherit from the most recent earlier intent for the
/// same component.
fn resolve_request(
    buffer: &std::collections::VecDeque<Buffered>,
    newest: &SignalEvent,
    intent: &IntentPayload,
) -> GenerationRequest {
    let component = intent.component.trim().to_lowercase();
    let earlier = buffer
        .iter()
        .rev()
        .skip(1)
        .filter_map(|b| b.event.as_intent())
        .find(|i| i.component.trim().eq_ignore_ascii_case(&component));

    let styles = match earlier {
        Some(prev) if intent.styles.is_empty() => prev.styles.clone(),
        _ => intent.styles.clone(),
    };
    let brand_refs = match earlier {
        Some(prev) if intent.brand_refs.is_empty() => prev.brand_refs.clone(),
        _ => intent.brand_refs.clone(),
    };
    let interaction = intent
        .interaction
        .clone()
        .or_else(|| earlier.and_then(|p| p.interaction.clone()));

    let attrs = NormalizedAttrs::new(&component, &styles, &brand_refs);
    let mut request =
        GenerationRequest::new(newest.session_id.clone(), attrs.component.clone(), attrs.fingerprint());
    request.styles = attrs.styles;
    request.brand_refs = dedup_preserving_case(&brand_refs);
    request.interaction = interaction;

    request.source_event_ids.push(newest.event_id.clone());
    request.source_event_ids.extend(
        buffer
            .iter()
            .filter(|b| b.event.event_id != newest.event_id)
            .filter(|b| b.event.utterance_id() == Some(intent.utterance_id.as_str()))
            .map(|b| b.event.event_id.clone()),
    );
    request
}

/// Brands keep their spelling for the generator; duplicates collapse case-insensitively.
fn dedup_preserving_case(items: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .map(str::to_string)
        .collect()
}
