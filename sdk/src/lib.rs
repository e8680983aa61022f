//! Quartet SDK
//!
//! Shared contract between the conductor and its arms: the message envelope,
//! the arm trait, per-call context and the engine error type.

/// Arm trait
pub mod arm;

/// Per-call cancellation and deadline context
pub mod context;

/// Error types and handling
pub mod errors;

/// Message envelope types
pub mod types;

// Re-export commonly used types
pub use arm::Arm;
pub use context::CallContext;
pub use errors::{EngineError, QuartetErrorExt};
pub use types::{Message, MessageKind};
