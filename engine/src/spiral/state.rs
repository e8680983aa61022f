//! Spiral protocol state graph
//!
//! Pure transition function, no I/O. The session drives it and performs the
//! side effects of each phase.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of witness anchors required to leave FOUR_WITNESSES
pub const REQUIRED_ANCHORS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpiralState {
    Init,
    InwardQa,
    FourWitnesses,
    HeavenMode,
    Run,
    Complete,
}

impl SpiralState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpiralState::Init => "INIT",
            SpiralState::InwardQa => "INWARD_QA",
            SpiralState::FourWitnesses => "FOUR_WITNESSES",
            SpiralState::HeavenMode => "HEAVEN_MODE",
            SpiralState::Run => "RUN",
            SpiralState::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for SpiralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Witness anchors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    Water,
    Fire,
    Earth,
    Air,
}

impl Anchor {
    pub const ALL: [Anchor; 4] = [Anchor::Water, Anchor::Fire, Anchor::Earth, Anchor::Air];

    pub fn as_str(&self) -> &'static str {
        match self {
            Anchor::Water => "water",
            Anchor::Fire => "fire",
            Anchor::Earth => "earth",
            Anchor::Air => "air",
        }
    }
}

impl FromStr for Anchor {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Anchor::ALL
            .into_iter()
            .find(|a| a.as_str() == s.to_lowercase())
            .ok_or_else(|| EngineError::InvalidPayload(format!("unknown anchor '{}'", s)))
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the session observed while performing the current phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepFacts {
    /// Readiness check result (INWARD_QA only)
    pub ready: bool,
    /// Anchors activated so far
    pub anchors: usize,
}

/// Next state after performing `state`'s phase
///
/// INWARD_QA loops on itself until ready. Leaving FOUR_WITNESSES without
/// exactly four anchors, or advancing past COMPLETE, is a protocol violation.
pub fn next_state(state: SpiralState, facts: StepFacts) -> Result<SpiralState, EngineError> {
    match state {
        SpiralState::Init => Ok(SpiralState::InwardQa),
        SpiralState::InwardQa if facts.ready => Ok(SpiralState::FourWitnesses),
        SpiralState::InwardQa => Ok(SpiralState::InwardQa),
        SpiralState::FourWitnesses if facts.anchors == REQUIRED_ANCHORS => {
            Ok(SpiralState::HeavenMode)
        }
        SpiralState::FourWitnesses => Err(EngineError::ProtocolInvariantViolation(format!(
            "{} of {} witness anchors activated",
            facts.anchors, REQUIRED_ANCHORS
        ))),
        SpiralState::HeavenMode => Ok(SpiralState::Run),
        SpiralState::Run => Ok(SpiralState::Complete),
        SpiralState::Complete => Err(EngineError::ProtocolInvariantViolation(
            "session is already complete".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_order() {
        let facts = StepFacts {
            ready: true,
            anchors: 4,
        };
        let mut state = SpiralState::Init;
        let mut visited = vec![state];
        while state != SpiralState::Complete {
            state = next_state(state, facts).unwrap();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                SpiralState::Init,
                SpiralState::InwardQa,
                SpiralState::FourWitnesses,
                SpiralState::HeavenMode,
                SpiralState::Run,
                SpiralState::Complete,
            ]
        );
    }

    #[test]
    fn test_inward_qa_waits_for_readiness() {
        let not_ready = StepFacts::default();
        assert_eq!(next_state(SpiralState::InwardQa, not_ready).unwrap(), SpiralState::InwardQa);
    }

    #[test]
    fn test_witnesses_need_all_four_anchors() {
        for anchors in 0..4 {
            let facts = StepFacts {
                ready: true,
                anchors,
            };
            assert!(matches!(
                next_state(SpiralState::FourWitnesses, facts),
                Err(EngineError::ProtocolInvariantViolation(_))
            ));
        }
    }

    #[test]
    fn test_complete_is_terminal() {
        assert!(next_state(SpiralState::Complete, StepFacts::default()).is_err());
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(serde_json::to_string(&SpiralState::InwardQa).unwrap(), "\"INWARD_QA\"");
        assert_eq!("Fire".parse::<Anchor>().unwrap(), Anchor::Fire);
        assert!("aether".parse::<Anchor>().is_err());
    }
}
