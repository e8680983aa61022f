//! Spiral protocol
//!
//! A session-scoped state machine started by `spiral_protocol` messages. The
//! conductor hands the message to [`SpiralService`], which builds a fresh
//! [`SpiralSession`] per request and runs it to completion.

pub mod session;
pub mod state;

pub use session::{SpiralSession, INWARD_PROMPTS, SILENT_ANSWER};
pub use state::{next_state, Anchor, SpiralState, StepFacts, REQUIRED_ANCHORS};

use crate::clock::Clock;
use crate::config::SpiralConfig;
use crate::message_bus::{Event, MessageBus};
use async_trait::async_trait;
use sdk::{CallContext, EngineError, Message};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Silence/breath check gating the end of the inward Q&A
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// `attempt` counts from 1 within a session
    async fn is_ready(&self, attempt: u32, answers: &[String]) -> bool;
}

/// Ready once `required_attempts` rounds have been taken
#[derive(Debug, Clone, Copy)]
pub struct BreathCheck {
    required_attempts: u32,
}

impl BreathCheck {
    pub fn new(required_attempts: u32) -> Self {
        Self {
            required_attempts: required_attempts.max(1),
        }
    }
}

impl Default for BreathCheck {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ReadinessCheck for BreathCheck {
    async fn is_ready(&self, attempt: u32, _answers: &[String]) -> bool {
        attempt >= self.required_attempts
    }
}

/// External effects of the protocol (sound, light, display)
#[async_trait]
pub trait SpiralEffects: Send + Sync {
    async fn activate(&self, effect: &str) -> Result<(), EngineError>;

    async fn transition(&self, from: SpiralState, to: SpiralState);
}

/// Effects that only log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEffects;

#[async_trait]
impl SpiralEffects for LoggingEffects {
    async fn activate(&self, effect: &str) -> Result<(), EngineError> {
        debug!("Effect activated: {}", effect);
        Ok(())
    }

    async fn transition(&self, from: SpiralState, to: SpiralState) {
        debug!("Transition {} -> {}", from, to);
    }
}

/// Effects that publish transitions on the message bus
#[derive(Clone)]
pub struct BusEffects {
    bus: MessageBus,
}

impl BusEffects {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl SpiralEffects for BusEffects {
    async fn activate(&self, effect: &str) -> Result<(), EngineError> {
        debug!("Effect activated: {}", effect);
        Ok(())
    }

    async fn transition(&self, from: SpiralState, to: SpiralState) {
        self.bus
            .publish(Event::SpiralTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
            .await;
    }
}

/// Payload of a `spiral_protocol` message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SpiralRequest {
    #[serde(default)]
    pub answers: Vec<String>,
    /// Anchors to activate; all four when absent
    #[serde(default)]
    pub anchors: Option<Vec<Anchor>>,
}

/// Builds and runs spiral sessions
pub struct SpiralService {
    config: SpiralConfig,
    clock: Arc<dyn Clock>,
    readiness: Arc<dyn ReadinessCheck>,
    effects: Arc<dyn SpiralEffects>,
}

impl SpiralService {
    pub fn new(
        config: SpiralConfig,
        clock: Arc<dyn Clock>,
        readiness: Arc<dyn ReadinessCheck>,
        effects: Arc<dyn SpiralEffects>,
    ) -> Self {
        Self {
            config,
            clock,
            readiness,
            effects,
        }
    }

    pub fn new_session(&self, request: SpiralRequest) -> Result<SpiralSession, EngineError> {
        if request.answers.len() > INWARD_PROMPTS.len() {
            return Err(EngineError::InvalidPayload(format!(
                "at most {} answers are accepted, got {}",
                INWARD_PROMPTS.len(),
                request.answers.len()
            )));
        }

        Ok(SpiralSession::new(
            self.config.clone(),
            request.answers,
            request.anchors.unwrap_or_else(|| Anchor::ALL.to_vec()),
            self.clock.clone(),
            self.readiness.clone(),
            self.effects.clone(),
        ))
    }

    /// Run one session for `msg` and answer with `spiral_protocol_complete`
    pub async fn handle(&self, msg: Message, ctx: &CallContext) -> Result<Message, EngineError> {
        let request: SpiralRequest = if msg.payload.is_null() {
            SpiralRequest::default()
        } else {
            serde_json::from_value(msg.payload.clone())?
        };

        let mut session = self.new_session(request)?;
        session.run(ctx).await?;
        info!("Spiral session for message {} complete", msg.id);

        Ok(Message::respond(
            &msg,
            json!({
                "success": true,
                "state": session.state(),
                "anchors": session.anchors(),
                "gates": session.gates(),
                "history": session.history(),
                "session_data": session.session_data(),
            }),
        ))
    }
}
