//! A single spiral protocol run

use super::state::{next_state, Anchor, SpiralState, StepFacts};
use super::{ReadinessCheck, SpiralEffects};
use crate::clock::Clock;
use crate::config::SpiralConfig;
use sdk::context::CallContext;
use sdk::errors::EngineError;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Prompts of the inward Q&A phase
pub const INWARD_PROMPTS: [&str; 3] = [
    "What are you carrying right now?",
    "What are you ready to set down?",
    "What intention do you bring forward?",
];

/// Recorded when a prompt gets no answer
pub const SILENT_ANSWER: &str = "(silence)";

/// Session state plus the collaborators that perform its side effects
pub struct SpiralSession {
    state: SpiralState,
    anchors_activated: BTreeSet<Anchor>,
    gates_activated: BTreeSet<u32>,
    session_data: Map<String, Value>,
    history: Vec<SpiralState>,
    answers: Vec<String>,
    witnesses: Vec<Anchor>,
    readiness_attempts: u32,
    config: SpiralConfig,
    clock: Arc<dyn Clock>,
    readiness: Arc<dyn ReadinessCheck>,
    effects: Arc<dyn SpiralEffects>,
}

impl SpiralSession {
    /// `witnesses` are the anchors the FOUR_WITNESSES phase will activate
    pub fn new(
        config: SpiralConfig,
        answers: Vec<String>,
        witnesses: Vec<Anchor>,
        clock: Arc<dyn Clock>,
        readiness: Arc<dyn ReadinessCheck>,
        effects: Arc<dyn SpiralEffects>,
    ) -> Self {
        Self {
            state: SpiralState::Init,
            anchors_activated: BTreeSet::new(),
            gates_activated: BTreeSet::new(),
            session_data: Map::new(),
            history: vec![SpiralState::Init],
            answers,
            witnesses,
            readiness_attempts: 0,
            config,
            clock,
            readiness,
            effects,
        }
    }

    pub fn state(&self) -> SpiralState {
        self.state
    }

    pub fn anchors(&self) -> &BTreeSet<Anchor> {
        &self.anchors_activated
    }

    pub fn gates(&self) -> &BTreeSet<u32> {
        &self.gates_activated
    }

    pub fn history(&self) -> &[SpiralState] {
        &self.history
    }

    pub fn session_data(&self) -> &Map<String, Value> {
        &self.session_data
    }

    /// Activate one witness anchor; returns false if it was already active
    pub async fn activate_anchor(&mut self, anchor: Anchor) -> Result<bool, EngineError> {
        if self.anchors_activated.contains(&anchor) {
            return Ok(false);
        }
        self.effects.activate(&format!("anchor:{}", anchor)).await?;
        self.anchors_activated.insert(anchor);
        debug!("Anchor {} activated ({}/4)", anchor, self.anchors_activated.len());
        Ok(true)
    }

    /// Open gate `gate`; numbers outside `1..=gate_count` fail and change nothing
    pub fn activate_gate(&mut self, gate: u32) -> Result<bool, EngineError> {
        self.check_gate(gate)?;
        Ok(self.gates_activated.insert(gate))
    }

    fn check_gate(&self, gate: u32) -> Result<(), EngineError> {
        if gate == 0 || gate > self.config.gate_count {
            return Err(EngineError::InvalidGate {
                gate,
                max: self.config.gate_count,
            });
        }
        Ok(())
    }

    /// Reset to INIT and clear anchors and gates
    pub fn deactivate(&mut self) {
        info!("Spiral session deactivated in {}", self.state);
        self.state = SpiralState::Init;
        self.anchors_activated.clear();
        self.gates_activated.clear();
        self.readiness_attempts = 0;
        self.history.push(SpiralState::Init);
    }

    /// Perform the current phase and move to the next state
    pub async fn advance(&mut self, ctx: &CallContext) -> Result<SpiralState, EngineError> {
        ctx.check()?;
        let from = self.state;
        let mut facts = StepFacts {
            ready: false,
            anchors: self.anchors_activated.len(),
        };

        match from {
            SpiralState::Init => {
                self.effects.activate("spiral:opening").await?;
            }
            SpiralState::InwardQa => {
                self.readiness_attempts += 1;
                let qa: Vec<Value> = INWARD_PROMPTS
                    .iter()
                    .enumerate()
                    .map(|(i, prompt)| {
                        let answer = self
                            .answers
                            .get(i)
                            .map(String::as_str)
                            .filter(|a| !a.trim().is_empty())
                            .unwrap_or(SILENT_ANSWER);
                        json!({ "prompt": prompt, "answer": answer })
                    })
                    .collect();
                self.session_data.insert("inward_qa".to_string(), Value::Array(qa));

                facts.ready = ctx
                    .run(self.readiness.is_ready(self.readiness_attempts, &self.answers))
                    .await?;
                self.session_data.insert(
                    "readiness_attempts".to_string(),
                    json!(self.readiness_attempts),
                );
            }
            SpiralState::FourWitnesses => {
                for anchor in self.witnesses.clone() {
                    self.activate_anchor(anchor).await?;
                }
                facts.anchors = self.anchors_activated.len();
            }
            SpiralState::HeavenMode => {
                // all or nothing
                for gate in &self.config.heaven_gates {
                    self.check_gate(*gate)?;
                }
                self.gates_activated
                    .extend(self.config.heaven_gates.iter().copied());
                self.effects.activate("heaven_mode").await?;
                self.session_data.insert(
                    "heaven_mode".to_string(),
                    json!({ "gates": self.gates_activated, "anchors": self.anchors_activated }),
                );
            }
            SpiralState::Run => {
                self.effects.activate("spiral:run").await?;
            }
            SpiralState::Complete => {}
        }

        let to = next_state(from, facts)?;
        self.state = to;
        self.history.push(to);
        self.effects.transition(from, to).await;
        debug!("Spiral {} -> {}", from, to);
        Ok(to)
    }

    /// Advance until COMPLETE, pausing between phases
    ///
    /// Cancellation or deadline expiry deactivates the session before the
    /// error is returned.
    pub async fn run(&mut self, ctx: &CallContext) -> Result<(), EngineError> {
        info!("Spiral protocol starting");

        while self.state != SpiralState::Complete {
            let step = match ctx.run(self.clock.sleep(self.config.phase_delay())).await {
                Ok(()) => self.advance(ctx).await,
                Err(e) => Err(e),
            };

            match step {
                Ok(_) => {}
                Err(e @ (EngineError::Cancelled | EngineError::DeadlineExceeded)) => {
                    self.deactivate();
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        info!("Spiral protocol complete after {} transitions", self.history.len() - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::InstantClock;
    use crate::spiral::{BreathCheck, LoggingEffects};

    fn session(witnesses: Vec<Anchor>, readiness: Arc<dyn ReadinessCheck>) -> SpiralSession {
        SpiralSession::new(
            SpiralConfig::default(),
            vec!["tired".to_string()],
            witnesses,
            Arc::new(InstantClock::new()),
            readiness,
            Arc::new(LoggingEffects),
        )
    }

    #[tokio::test]
    async fn test_full_run() {
        let mut s = session(Anchor::ALL.to_vec(), Arc::new(BreathCheck::new(1)));
        s.run(&CallContext::new()).await.unwrap();

        assert_eq!(s.state(), SpiralState::Complete);
        assert_eq!(s.anchors().len(), 4);
        assert_eq!(s.gates().len(), 7);
        assert_eq!(s.session_data()["inward_qa"][0]["answer"], json!("tired"));
        assert_eq!(s.session_data()["inward_qa"][1]["answer"], json!(SILENT_ANSWER));
    }

    #[tokio::test]
    async fn test_inward_qa_repeats_until_ready() {
        let mut s = session(Anchor::ALL.to_vec(), Arc::new(BreathCheck::new(3)));
        s.run(&CallContext::new()).await.unwrap();

        let qa_visits = s
            .history()
            .iter()
            .filter(|st| **st == SpiralState::InwardQa)
            .count();
        assert_eq!(qa_visits, 3);
    }

    #[tokio::test]
    async fn test_missing_anchor_stops_at_witnesses() {
        let mut s = session(
            vec![Anchor::Water, Anchor::Fire, Anchor::Earth],
            Arc::new(BreathCheck::new(1)),
        );
        let err = s.run(&CallContext::new()).await.unwrap_err();

        assert!(matches!(err, EngineError::ProtocolInvariantViolation(_)));
        assert_eq!(s.state(), SpiralState::FourWitnesses);
        assert!(!s.history().contains(&SpiralState::HeavenMode));
    }

    #[tokio::test]
    async fn test_invalid_gate_leaves_state_alone() {
        let mut s = session(Anchor::ALL.to_vec(), Arc::new(BreathCheck::new(1)));
        s.activate_gate(2).unwrap();

        assert_eq!(s.activate_gate(0), Err(EngineError::InvalidGate { gate: 0, max: 7 }));
        assert_eq!(s.activate_gate(8), Err(EngineError::InvalidGate { gate: 8, max: 7 }));
        assert_eq!(s.gates().iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(s.state(), SpiralState::Init);
    }

    #[tokio::test]
    async fn test_heaven_mode_with_bad_gate_opens_none() {
        let config = SpiralConfig {
            heaven_gates: vec![1, 2, 3, 42],
            ..SpiralConfig::default()
        };
        let mut s = SpiralSession::new(
            config,
            vec![],
            Anchor::ALL.to_vec(),
            Arc::new(InstantClock::new()),
            Arc::new(BreathCheck::new(1)),
            Arc::new(LoggingEffects),
        );
        let ctx = CallContext::new();
        for _ in 0..3 {
            s.advance(&ctx).await.unwrap();
        }

        let err = s.advance(&ctx).await.unwrap_err();
        assert_eq!(err, EngineError::InvalidGate { gate: 42, max: 7 });
        assert!(s.gates().is_empty());
        assert!(!s.session_data().contains_key("heaven_mode"));
    }

    #[tokio::test]
    async fn test_deactivate_resets() {
        let mut s = session(Anchor::ALL.to_vec(), Arc::new(BreathCheck::new(1)));
        let ctx = CallContext::new();
        for _ in 0..3 {
            s.advance(&ctx).await.unwrap();
        }
        assert_eq!(s.state(), SpiralState::HeavenMode);

        s.deactivate();
        assert_eq!(s.state(), SpiralState::Init);
        assert!(s.anchors().is_empty());
        assert!(s.gates().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_deactivates() {
        let mut s = session(Anchor::ALL.to_vec(), Arc::new(BreathCheck::new(1)));
        let ctx = CallContext::new();
        ctx.cancel();

        assert_eq!(s.run(&ctx).await, Err(EngineError::Cancelled));
        assert_eq!(s.state(), SpiralState::Init);
    }
}
