//! Message Bus for observing dispatch
//!
//! The MessageBus is a pub/sub side channel: the conductor, the arms and the
//! spiral protocol publish what they did, and tests or the CLI subscribe.
//! Subscribers get bounded channels. Publishing uses `try_send`, so a slow or
//! dropped subscriber loses events instead of stalling message dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    MessageRouted,
    MessageQuarantined,
    MemoryStored,
    PlanCheckpoint,
    ToolExecuted,
    SpiralTransition,
    /// Subscribe to all event types
    All,
}

/// Events published on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A message reached its handler and returned a response
    MessageRouted {
        message_id: String,
        kind: String,
        handler: String,
    },
    /// A message could not be routed or its handler failed
    MessageQuarantined {
        message_id: String,
        kind: String,
        reason: String,
    },
    MemoryStored {
        memory_id: String,
        memory_type: String,
        access_count: i64,
    },
    PlanCheckpoint {
        plan_id: String,
        progress: f64,
        needs_adjustment: bool,
    },
    ToolExecuted {
        tool: String,
        success: bool,
    },
    SpiralTransition {
        from: String,
        to: String,
    },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::MessageRouted { .. } => EventType::MessageRouted,
            Event::MessageQuarantined { .. } => EventType::MessageQuarantined,
            Event::MemoryStored { .. } => EventType::MemoryStored,
            Event::PlanCheckpoint { .. } => EventType::PlanCheckpoint,
            Event::ToolExecuted { .. } => EventType::ToolExecuted,
            Event::SpiralTransition { .. } => EventType::SpiralTransition,
        }
    }
}

/// Pub/sub hub shared by every component of an orchestrator
#[derive(Clone, Default)]
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event type, or to everything with `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Deliver `event` to its type's subscribers and to `All` subscribers
    ///
    /// Closed subscribers are pruned. Full subscribers miss the event.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        trace!("Subscriber full, dropping {:?}", event_type);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    /// Live subscriptions across all event types
    pub async fn subscriber_count(&self) -> usize {
        self.channels.lock().await.values().map(Vec::len).sum()
    }
}
