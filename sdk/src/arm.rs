//! Arm trait
//!
//! An arm is a specialised message handler bound to one message category.
//! The Conductor owns a registry of arms and awaits exactly one of them per
//! inbound message.

use crate::context::CallContext;
use crate::errors::EngineError;
use crate::types::Message;
use async_trait::async_trait;

/// Trait that every arm must implement
#[async_trait]
pub trait Arm: Send + Sync {
    /// Registry name of the arm (e.g. `memory_arm`)
    fn name(&self) -> &str;

    /// Handle one message and produce its response
    ///
    /// Implementations must honour `ctx` at every suspension point.
    async fn handle(&self, msg: Message, ctx: &CallContext) -> Result<Message, EngineError>;
}
