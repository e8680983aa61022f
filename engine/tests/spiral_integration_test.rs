//! Integration tests for the spiral protocol
//!
//! Steps sessions one phase at a time and checks the witness invariant after
//! every step, across generated readiness delays and anchor subsets.

use async_trait::async_trait;
use proptest::prelude::*;
use quartet_engine::clock::InstantClock;
use quartet_engine::config::SpiralConfig;
use quartet_engine::spiral::{
    Anchor, BreathCheck, LoggingEffects, SpiralEffects, SpiralRequest, SpiralService,
    SpiralState, REQUIRED_ANCHORS,
};
use sdk::{CallContext, EngineError};
use std::sync::{Arc, Mutex};

fn service(required_breaths: u32, effects: Arc<dyn SpiralEffects>) -> SpiralService {
    SpiralService::new(
        SpiralConfig::default(),
        Arc::new(InstantClock::new()),
        Arc::new(BreathCheck::new(required_breaths)),
        effects,
    )
}

/// Collapse consecutive repeats so INWARD_QA retries count once
fn phases(history: &[SpiralState]) -> Vec<SpiralState> {
    let mut out: Vec<SpiralState> = Vec::new();
    for state in history {
        if out.last() != Some(state) {
            out.push(*state);
        }
    }
    out
}

proptest! {
    #[test]
    fn test_heaven_mode_requires_four_anchors(
        breaths in 1u32..5,
        anchor_mask in 0u8..16,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let anchors: Vec<Anchor> = Anchor::ALL
                .into_iter()
                .enumerate()
                .filter(|(i, _)| anchor_mask & (1 << i) != 0)
                .map(|(_, a)| a)
                .collect();
            let complete_set = anchors.len() == REQUIRED_ANCHORS;

            let mut session = service(breaths, Arc::new(LoggingEffects))
                .new_session(SpiralRequest { answers: vec![], anchors: Some(anchors) })
                .unwrap();
            let ctx = CallContext::new();

            loop {
                let step = session.advance(&ctx).await;
                if session.state() == SpiralState::HeavenMode {
                    prop_assert_eq!(session.anchors().len(), REQUIRED_ANCHORS);
                }
                match step {
                    Ok(SpiralState::Complete) => break,
                    Ok(_) => {}
                    Err(e) => {
                        prop_assert!(!complete_set);
                        prop_assert!(matches!(e, EngineError::ProtocolInvariantViolation(_)));
                        prop_assert_eq!(session.state(), SpiralState::FourWitnesses);
                        return Ok(());
                    }
                }
            }

            prop_assert!(complete_set);
            prop_assert_eq!(
                phases(session.history()),
                vec![
                    SpiralState::Init,
                    SpiralState::InwardQa,
                    SpiralState::FourWitnesses,
                    SpiralState::HeavenMode,
                    SpiralState::Run,
                    SpiralState::Complete,
                ]
            );
            let qa_rounds = session
                .history()
                .iter()
                .filter(|s| **s == SpiralState::InwardQa)
                .count();
            prop_assert_eq!(qa_rounds as u32, breaths);
            Ok(())
        })?;
    }
}

#[derive(Default)]
struct RecordingEffects {
    activated: Mutex<Vec<String>>,
}

#[async_trait]
impl SpiralEffects for RecordingEffects {
    async fn activate(&self, effect: &str) -> Result<(), EngineError> {
        if let Ok(mut activated) = self.activated.lock() {
            activated.push(effect.to_string());
        }
        Ok(())
    }

    async fn transition(&self, _from: SpiralState, _to: SpiralState) {}
}

#[tokio::test]
async fn test_effects_fire_in_phase_order() {
    let effects = Arc::new(RecordingEffects::default());
    let mut session = service(1, effects.clone())
        .new_session(SpiralRequest::default())
        .unwrap();

    session.run(&CallContext::new()).await.unwrap();

    let activated = effects.activated.lock().unwrap().clone();
    assert_eq!(
        activated,
        vec![
            "spiral:opening",
            "anchor:water",
            "anchor:fire",
            "anchor:earth",
            "anchor:air",
            "heaven_mode",
            "spiral:run",
        ]
    );
}

#[tokio::test]
async fn test_duplicate_anchors_do_not_count_twice() {
    let request = SpiralRequest {
        answers: vec![],
        anchors: Some(vec![Anchor::Fire, Anchor::Fire, Anchor::Water, Anchor::Air]),
    };
    let mut session = service(1, Arc::new(LoggingEffects))
        .new_session(request)
        .unwrap();

    let err = session.run(&CallContext::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::ProtocolInvariantViolation(_)));
    assert_eq!(session.anchors().len(), 3);
}

#[tokio::test]
async fn test_gate_bounds_follow_config() {
    let config = SpiralConfig {
        gate_count: 3,
        heaven_gates: vec![1, 2, 3],
        ..SpiralConfig::default()
    };
    let service = SpiralService::new(
        config,
        Arc::new(InstantClock::new()),
        Arc::new(BreathCheck::default()),
        Arc::new(LoggingEffects),
    );
    let mut session = service.new_session(SpiralRequest::default()).unwrap();

    assert!(session.activate_gate(3).unwrap());
    assert!(!session.activate_gate(3).unwrap());
    assert_eq!(
        session.activate_gate(4),
        Err(EngineError::InvalidGate { gate: 4, max: 3 })
    );

    session.run(&CallContext::new()).await.unwrap();
    assert_eq!(session.gates().len(), 3);
}

#[tokio::test]
async fn test_heaven_gate_outside_range_fails_run() {
    let config = SpiralConfig {
        gate_count: 7,
        heaven_gates: vec![1, 9],
        ..SpiralConfig::default()
    };
    let service = SpiralService::new(
        config,
        Arc::new(InstantClock::new()),
        Arc::new(BreathCheck::default()),
        Arc::new(LoggingEffects),
    );
    let mut session = service.new_session(SpiralRequest::default()).unwrap();

    let err = session.run(&CallContext::new()).await.unwrap_err();
    assert_eq!(err, EngineError::InvalidGate { gate: 9, max: 7 });
    assert_eq!(session.state(), SpiralState::HeavenMode);
    // gate 1 was valid but is not left half-open
    assert!(session.gates().is_empty());
}
