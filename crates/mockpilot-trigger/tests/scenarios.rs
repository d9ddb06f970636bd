//! Conversation-level behaviour of the debounce engine.

use std::time::Duration;

use mockpilot_core::events::{EventPayload, IntentPayload, TranscriptPayload};
use mockpilot_core::{GenerationRequest, SignalEvent};
use mockpilot_trigger::{DebounceEngine, EngineConfig};
use proptest::prelude::*;
use tokio::time::Instant;

fn transcript(session: &str, utt: &str, text: &str, gap_ms: u64) -> SignalEvent {
    SignalEvent::new(
        session,
        EventPayload::Transcript(TranscriptPayload {
            msg_id: format!("m-{utt}"),
            utterance_id: utt.into(),
            text: text.into(),
            silence_gap_ms: Some(gap_ms),
            ..TranscriptPayload::default()
        }),
    )
}

fn intent(session: &str, payload: IntentPayload) -> SignalEvent {
    SignalEvent::new(session, EventPayload::Intent(payload))
}

fn button_hover_stripe(confidence: f64) -> IntentPayload {
    IntentPayload {
        utterance_id: "u1".into(),
        component: "button".into(),
        styles: vec!["hover".into()],
        brand_refs: vec!["Stripe".into()],
        confidence,
        ..IntentPayload::default()
    }
}

fn ingest(engine: &mut DebounceEngine, ev: SignalEvent, at: Instant) -> Vec<GenerationRequest> {
    engine.ingest(ev, at).unwrap()
}

#[test]
fn happy_path_fires_once_then_suppresses_duplicate() {
    let mut engine = DebounceEngine::new(EngineConfig::default());
    let t0 = Instant::now();

    let t1 = transcript("S", "u1", "let's use a hover animation like Stripe", 2_000);
    let t1_id = t1.event_id.clone();
    assert!(ingest(&mut engine, t1, t0).is_empty());

    let i1 = intent("S", button_hover_stripe(0.83));
    let i1_id = i1.event_id.clone();
    let out = ingest(&mut engine, i1, t0 + Duration::from_millis(2_100));
    assert_eq!(out.len(), 1);
    let req = &out[0];
    assert_eq!(req.session_id.as_str(), "S");
    assert_eq!(req.component, "button");
    assert_eq!(req.styles, vec!["hover"]);
    assert_eq!(req.brand_refs, vec!["Stripe"]);
    assert_eq!(req.source_event_ids, vec![i1_id, t1_id]);

    let dup = intent("S", button_hover_stripe(0.83));
    assert!(ingest(&mut engine, dup, t0 + Duration::from_millis(3_100)).is_empty());
}

#[test]
fn cue_phrase_overrides_short_silence() {
    let mut engine = DebounceEngine::new(EngineConfig::default());
    let t0 = Instant::now();

    let _ = ingest(&mut engine, transcript("S", "u2", "hmm what about a modal", 300), t0);
    let i2 = intent(
        "S",
        IntentPayload {
            utterance_id: "u2".into(),
            component: "modal".into(),
            confidence: 0.80,
            text: Some("ok let's build a modal".into()),
            silence_gap_ms: Some(300),
            ..IntentPayload::default()
        },
    );
    let out = ingest(&mut engine, i2, t0 + Duration::from_millis(300));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].component, "modal");
}

#[test]
fn low_confidence_never_fires() {
    let mut engine = DebounceEngine::new(EngineConfig::default());
    let t0 = Instant::now();

    let _ = ingest(&mut engine, transcript("S", "u3", "maybe a dropdown", 3_000), t0);
    let i3 = intent(
        "S",
        IntentPayload {
            utterance_id: "u3".into(),
            component: "dropdown".into(),
            confidence: 0.5,
            silence_gap_ms: Some(3_000),
            ..IntentPayload::default()
        },
    );
    assert!(ingest(&mut engine, i3, t0 + Duration::from_secs(3)).is_empty());
}

#[test]
fn ttl_reclaim_starts_fresh_window() {
    let config = EngineConfig {
        session_ttl: Duration::from_secs(30),
        ..EngineConfig::default()
    };
    let sweep_interval = Duration::from_secs(10);
    let mut engine = DebounceEngine::new(config);
    let t0 = Instant::now();

    let _ = ingest(&mut engine, transcript("S", "u1", "x", 2_000), t0);
    assert!(engine.has_session("S"));

    // within one sweep interval after the TTL passes, the session is gone
    let _ = engine.sweep(t0 + Duration::from_secs(30));
    assert!(engine.has_session("S"));
    let _ = engine.sweep(t0 + Duration::from_secs(30) + sweep_interval);
    assert!(!engine.has_session("S"));

    // the returning session starts without a boundary
    let out = ingest(&mut engine, intent("S", button_hover_stripe(0.9)), t0 + Duration::from_secs(45));
    assert!(out.is_empty());
}

#[test]
fn pause_at_or_past_horizon_counts_as_silence() {
    for pause in [Duration::from_secs(5), Duration::from_secs(6), Duration::from_secs(20)] {
        let mut engine = DebounceEngine::new(EngineConfig::default());
        assert_eq!(engine.config().horizon, Duration::from_secs(5));
        let t0 = Instant::now();

        let _ = ingest(&mut engine, transcript("S", "u1", "something with a hover", 0), t0);
        let out = ingest(&mut engine, intent("S", button_hover_stripe(0.9)), t0 + pause);
        assert_eq!(out.len(), 1, "pause of {pause:?} did not fire");
    }
}

#[derive(Clone, Debug)]
struct Step {
    after_ms: u64,
    confidence: f64,
    gap_ms: Option<u64>,
    cue: bool,
    shuffle: bool,
}

fn step() -> impl Strategy<Value = Step> {
    (0u64..600, 0.0f64..=1.0, proptest::option::of(0u64..4_000), any::<bool>(), any::<bool>())
        .prop_map(|(after_ms, confidence, gap_ms, cue, shuffle)| Step {
            after_ms,
            confidence,
            gap_ms,
            cue,
            shuffle,
        })
}

proptest! {
    #[test]
    fn identical_intents_within_horizon_fire_at_most_once(
        steps in proptest::collection::vec(step(), 1..8),
        interleave_transcripts in any::<bool>(),
    ) {
        let mut engine = DebounceEngine::new(EngineConfig::default());
        let horizon = engine.config().horizon;
        let t0 = Instant::now();
        let mut elapsed = Duration::ZERO;
        let mut fired = 0;

        for (n, s) in steps.iter().enumerate() {
            elapsed += Duration::from_millis(s.after_ms);
            prop_assume!(elapsed < horizon);
            let at = t0 + elapsed;

            if interleave_transcripts {
                let _ = engine
                    .ingest(transcript("S", &format!("u{n}"), "filler", 2_000), at)
                    .unwrap();
            }

            let (styles, brands) = if s.shuffle {
                (vec!["Pill".into(), "hover".into()], vec!["stripe".into()])
            } else {
                (vec!["hover".into(), "pill".into(), "hover".into()], vec!["Stripe".into()])
            };
            let payload = IntentPayload {
                utterance_id: format!("u{n}"),
                component: if s.shuffle { "Button".into() } else { "button".into() },
                styles,
                brand_refs: brands,
                confidence: s.confidence,
                text: s.cue.then(|| "let's build it".to_string()),
                silence_gap_ms: s.gap_ms,
                ..IntentPayload::default()
            };
            fired += engine.ingest(intent("S", payload), at).unwrap().len();
        }

        prop_assert!(fired <= 1, "fired {} requests", fired);
    }
}
