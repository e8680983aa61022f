//! Conductor
//!
//! Routes each inbound message to exactly one handler and keeps the
//! processed/quarantined counters. Every failure, including a panicking arm,
//! is caught here, counted, and returned as a typed [`ConductorError`]; the
//! dispatcher itself never goes down with a handler.

pub mod router;

pub use router::{route, Route};

use crate::message_bus::{Event, MessageBus};
use crate::spiral::SpiralService;
use futures::FutureExt;
use sdk::{Arm, CallContext, EngineError, Message};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Name the spiral protocol is reported under
pub const SPIRAL_HANDLER: &str = "spiral_protocol";

#[derive(Debug, Error, PartialEq)]
pub enum ConductorError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("No handler registered for '{0}'")]
    NoHandler(String),

    #[error("Handler '{arm}' failed: {source}")]
    HandlerFailure {
        arm: String,
        #[source]
        source: EngineError,
    },

    #[error("Handler '{arm}' panicked: {message}")]
    HandlerPanicked { arm: String, message: String },
}

impl ConductorError {
    /// The handler involved, when there was one
    pub fn handler(&self) -> Option<&str> {
        match self {
            ConductorError::UnknownMessageType(_) => None,
            ConductorError::NoHandler(name) => Some(name.as_str()),
            ConductorError::HandlerFailure { arm, .. } | ConductorError::HandlerPanicked { arm, .. } => {
                Some(arm.as_str())
            }
        }
    }
}

/// Counters and registered arms
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConductorStatus {
    pub processed_messages: u64,
    pub quarantined_messages: u64,
    pub registered_arms: Vec<String>,
}

pub struct Conductor {
    arms: RwLock<HashMap<String, Arc<dyn Arm>>>,
    spiral: RwLock<Option<Arc<SpiralService>>>,
    processed: AtomicU64,
    quarantined: AtomicU64,
    bus: MessageBus,
}

impl Conductor {
    pub fn new(bus: MessageBus) -> Self {
        Self {
            arms: RwLock::new(HashMap::new()),
            spiral: RwLock::new(None),
            processed: AtomicU64::new(0),
            quarantined: AtomicU64::new(0),
            bus,
        }
    }

    /// Bind `name` to `arm`, replacing any earlier binding
    pub async fn register_arm(&self, name: impl Into<String>, arm: Arc<dyn Arm>) {
        let name = name.into();
        let replaced = self.arms.write().await.insert(name.clone(), arm).is_some();
        if replaced {
            info!("Replaced handler for {}", name);
        } else {
            info!("Registered handler for {}", name);
        }
    }

    pub async fn attach_spiral(&self, service: Arc<SpiralService>) {
        *self.spiral.write().await = Some(service);
    }

    /// Route `msg` to its handler and await the response
    ///
    /// `processed` counts every call. `quarantined` counts every call that
    /// returns an error. Nothing is retried.
    pub async fn process_message(
        &self,
        msg: Message,
        ctx: &CallContext,
    ) -> Result<Message, ConductorError> {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let message_id = msg.id.clone();
        let kind = msg.kind.clone();

        let result = self.dispatch(msg, ctx).await;

        match &result {
            Ok(response) => {
                debug!("Message {} ({}) -> {}", message_id, kind, response.kind);
                self.bus
                    .publish(Event::MessageRouted {
                        message_id,
                        kind: kind.to_string(),
                        handler: route(&kind).map(|r| r.handler_name().to_string()).unwrap_or_default(),
                    })
                    .await;
            }
            Err(e) => {
                self.quarantined.fetch_add(1, Ordering::Relaxed);
                warn!("Quarantined message {} ({}): {}", message_id, kind, e);
                self.bus
                    .publish(Event::MessageQuarantined {
                        message_id,
                        kind: kind.to_string(),
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        result
    }

    async fn dispatch(&self, msg: Message, ctx: &CallContext) -> Result<Message, ConductorError> {
        let Some(target) = route(&msg.kind) else {
            return Err(ConductorError::UnknownMessageType(msg.kind.to_string()));
        };

        match target {
            Route::Arm(name) => {
                let arm = self
                    .arms
                    .read()
                    .await
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConductorError::NoHandler(name.to_string()))?;

                guarded(name, arm.handle(msg, ctx)).await
            }
            Route::Spiral => {
                let service = self
                    .spiral
                    .read()
                    .await
                    .clone()
                    .ok_or_else(|| ConductorError::NoHandler(SPIRAL_HANDLER.to_string()))?;

                guarded(SPIRAL_HANDLER, service.handle(msg, ctx)).await
            }
        }
    }

    pub async fn status(&self) -> ConductorStatus {
        let mut registered_arms: Vec<String> = self.arms.read().await.keys().cloned().collect();
        registered_arms.sort();

        ConductorStatus {
            processed_messages: self.processed.load(Ordering::Relaxed),
            quarantined_messages: self.quarantined.load(Ordering::Relaxed),
            registered_arms,
        }
    }
}

/// Await a handler future, turning errors and panics into `ConductorError`
async fn guarded<F>(name: &str, fut: F) -> Result<Message, ConductorError>
where
    F: std::future::Future<Output = Result<Message, EngineError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(source)) => Err(ConductorError::HandlerFailure {
            arm: name.to_string(),
            source,
        }),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ConductorError::HandlerPanicked {
                arm: name.to_string(),
                message,
            })
        }
    }
}
