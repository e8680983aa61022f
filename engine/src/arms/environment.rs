//! Environment arm
//!
//! Side-effecting actions go through an [`EnvironmentBackend`]. The default
//! [`DryRunBackend`] only records what it was asked to do, keeping the most
//! recent [`ACTION_LOG_CAPACITY`] entries and a running total.

use async_trait::async_trait;
use sdk::{Arm, CallContext, EngineError, Message};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

pub const ENVIRONMENT_ARM: &str = "environment_arm";

/// Entries a [`DryRunBackend`] keeps before dropping the oldest
pub const ACTION_LOG_CAPACITY: usize = 100;

/// Payload of an `environment_request` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvironmentRequest {
    Execute {
        action: String,
        #[serde(default)]
        params: Value,
    },
    Control {
        device: String,
        command: String,
    },
    Status,
}

/// Collaborator that performs environment actions
#[async_trait]
pub trait EnvironmentBackend: Send + Sync {
    async fn execute(&self, action: &str, params: &Value) -> Result<Value, EngineError>;

    async fn control(&self, device: &str, command: &str) -> Result<Value, EngineError>;

    async fn status(&self) -> Result<Value, EngineError>;
}

#[derive(Debug, Default)]
struct ActionLog {
    recent: VecDeque<String>,
    total: u64,
}

/// Backend that records requests without touching anything
#[derive(Debug)]
pub struct DryRunBackend {
    log: Mutex<ActionLog>,
    capacity: usize,
}

impl Default for DryRunBackend {
    fn default() -> Self {
        Self::with_capacity(ACTION_LOG_CAPACITY)
    }
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            log: Mutex::new(ActionLog::default()),
            capacity: capacity.max(1),
        }
    }

    /// Most recent actions, oldest first
    pub fn actions(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|l| l.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Actions received since start, including ones no longer kept
    pub fn total(&self) -> u64 {
        self.log.lock().map(|l| l.total).unwrap_or_default()
    }

    fn record(&self, entry: String) -> u64 {
        match self.log.lock() {
            Ok(mut log) => {
                if log.recent.len() == self.capacity {
                    log.recent.pop_front();
                }
                log.recent.push_back(entry);
                log.total += 1;
                log.total
            }
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl EnvironmentBackend for DryRunBackend {
    async fn execute(&self, action: &str, params: &Value) -> Result<Value, EngineError> {
        let seq = self.record(format!("execute:{}", action));
        Ok(json!({ "action": action, "params": params, "dry_run": true, "sequence": seq }))
    }

    async fn control(&self, device: &str, command: &str) -> Result<Value, EngineError> {
        let seq = self.record(format!("control:{}:{}", device, command));
        Ok(json!({ "device": device, "command": command, "dry_run": true, "sequence": seq }))
    }

    async fn status(&self) -> Result<Value, EngineError> {
        Ok(json!({ "backend": "dry_run", "actions_recorded": self.total() }))
    }
}

pub struct EnvironmentArm {
    backend: Arc<dyn EnvironmentBackend>,
}

impl EnvironmentArm {
    pub fn new(backend: Arc<dyn EnvironmentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Arm for EnvironmentArm {
    fn name(&self) -> &str {
        ENVIRONMENT_ARM
    }

    async fn handle(&self, msg: Message, ctx: &CallContext) -> Result<Message, EngineError> {
        let request: EnvironmentRequest = serde_json::from_value(msg.payload.clone())?;

        let (kind, result) = match &request {
            EnvironmentRequest::Execute { action, params } => {
                info!("Environment execute: {}", action);
                ("execute", ctx.run(self.backend.execute(action, params)).await??)
            }
            EnvironmentRequest::Control { device, command } => {
                info!("Environment control: {} -> {}", device, command);
                ("control", ctx.run(self.backend.control(device, command)).await??)
            }
            EnvironmentRequest::Status => ("status", ctx.run(self.backend.status()).await??),
        };

        Ok(Message::respond(
            &msg,
            json!({ "success": true, "type": kind, "result": result }),
        ))
    }
}
