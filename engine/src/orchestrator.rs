//! Orchestrator
//!
//! Builds the conductor, the four arms and the spiral service from one
//! [`OrchestratorConfig`] and an open [`Database`], then hands messages to the
//! conductor under a call context derived from its own shutdown token.

use crate::arms::{
    DryRunBackend, EnvironmentArm, EnvironmentBackend, MemoryArm, OfflineInvoker, PlanArm,
    ReasonArm, ToolInvoker, ENVIRONMENT_ARM, MEMORY_ARM, PLAN_ARM, REASON_ARM,
};
use crate::clock::{Clock, TokioClock};
use crate::conductor::{Conductor, ConductorError, ConductorStatus};
use crate::config::{Config, MemoryConfig, PlanConfig, ReasonConfig, SpiralConfig};
use crate::db::Database;
use crate::message_bus::MessageBus;
use crate::spiral::{BreathCheck, BusEffects, ReadinessCheck, SpiralEffects, SpiralService};
use sdk::{CallContext, EngineError, Message};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the orchestrator needs from the loaded configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub request_timeout: Duration,
    pub memory: MemoryConfig,
    pub plan: PlanConfig,
    pub reason: ReasonConfig,
    pub spiral: SpiralConfig,
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.core.request_timeout(),
            memory: config.memory.clone(),
            plan: config.plan.clone(),
            reason: config.reason.clone(),
            spiral: config.spiral.clone(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&Config::default_config())
    }
}

/// External collaborators injected into the arms
#[derive(Clone)]
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub tool_invoker: Arc<dyn ToolInvoker>,
    pub environment: Arc<dyn EnvironmentBackend>,
    pub readiness: Arc<dyn ReadinessCheck>,
    /// Spiral effects; transitions go to the message bus when unset
    pub effects: Option<Arc<dyn SpiralEffects>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            clock: Arc::new(TokioClock),
            tool_invoker: Arc::new(OfflineInvoker),
            environment: Arc::new(DryRunBackend::new()),
            readiness: Arc::new(BreathCheck::default()),
            effects: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    #[serde(flatten)]
    pub conductor: ConductorStatus,
    pub memory: Value,
}

pub struct Orchestrator {
    conductor: Arc<Conductor>,
    memory: Arc<MemoryArm>,
    bus: MessageBus,
    database: Database,
    shutdown: CancellationToken,
    request_timeout: Duration,
}

impl Orchestrator {
    /// Wire every arm with the default collaborators
    ///
    /// Spawns the memory actors, so this must run inside a tokio runtime.
    pub async fn new(config: OrchestratorConfig, database: Database) -> Self {
        Self::with_collaborators(config, database, Collaborators::default()).await
    }

    pub async fn with_collaborators(
        config: OrchestratorConfig,
        database: Database,
        collaborators: Collaborators,
    ) -> Self {
        let bus = MessageBus::new();
        let shutdown = CancellationToken::new();
        let conductor = Arc::new(Conductor::new(bus.clone()));

        let memory = Arc::new(MemoryArm::new(
            database.memory_store(),
            config.memory.clone(),
            bus.clone(),
            shutdown.child_token(),
        ));
        let plan = Arc::new(PlanArm::new(
            Arc::clone(&collaborators.clock),
            config.plan.clone(),
            bus.clone(),
        ));
        let reason = Arc::new(ReasonArm::new(
            Arc::clone(&collaborators.tool_invoker),
            config.reason.clone(),
            bus.clone(),
        ));
        let environment = Arc::new(EnvironmentArm::new(Arc::clone(&collaborators.environment)));

        conductor.register_arm(PLAN_ARM, plan).await;
        conductor.register_arm(REASON_ARM, reason).await;
        conductor
            .register_arm(MEMORY_ARM, Arc::clone(&memory) as Arc<dyn sdk::Arm>)
            .await;
        conductor.register_arm(ENVIRONMENT_ARM, environment).await;

        let effects = collaborators
            .effects
            .unwrap_or_else(|| Arc::new(BusEffects::new(bus.clone())));
        let spiral = SpiralService::new(
            config.spiral.clone(),
            collaborators.clock,
            collaborators.readiness,
            effects,
        );
        conductor.attach_spiral(Arc::new(spiral)).await;

        info!("Orchestrator ready");

        Self {
            conductor,
            memory,
            bus,
            database,
            shutdown,
            request_timeout: config.request_timeout,
        }
    }

    /// Process `msg` under the configured request timeout
    pub async fn send(&self, msg: Message) -> Result<Message, ConductorError> {
        let ctx = CallContext::with_token(self.shutdown.child_token())
            .with_timeout(self.request_timeout);
        self.send_with(msg, &ctx).await
    }

    /// Process `msg` under a caller-supplied context
    pub async fn send_with(
        &self,
        msg: Message,
        ctx: &CallContext,
    ) -> Result<Message, ConductorError> {
        self.conductor.process_message(msg, ctx).await
    }

    pub async fn status(&self) -> Result<OrchestratorStatus, EngineError> {
        Ok(OrchestratorStatus {
            conductor: self.conductor.status().await,
            memory: self.memory.stats().await?,
        })
    }

    pub fn conductor(&self) -> &Arc<Conductor> {
        &self.conductor
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Token cancelled on shutdown; every request context is a child of it
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Cancel in-flight work, stop the memory actor and close the database
    pub async fn shutdown(self) -> anyhow::Result<()> {
        info!("Orchestrator shutting down");
        self.shutdown.cancel();
        self.database.close().await
    }
}
