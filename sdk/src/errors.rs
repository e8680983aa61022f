//! Error types and handling
//!
//! This module provides the error types used throughout the Quartet engine.
//! All errors implement the `QuartetErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Hints are static strings. They never echo payload content, memory text or
//! tool parameters back to the caller.

use thiserror::Error;

/// Trait for Quartet error extensions
pub trait QuartetErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried with a corrected message or after a
    /// transient condition clears. Non-recoverable errors point at a broken
    /// invariant or a misconfigured engine.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Routing**: message types the Conductor cannot dispatch
/// - **Handler**: failures raised inside an Arm
/// - **Persistence**: memory store writes and database access
/// - **Tools**: Reason Arm tool chain failures
/// - **Protocol**: Spiral Protocol invariant violations
/// - **Control flow**: cancellation and deadlines
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, QuartetErrorExt};
///
/// let error = EngineError::ToolNotFound("teleport".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::ProtocolInvariantViolation("3 of 4 anchors".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    // Routing errors
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    // Handler errors
    #[error("Handler failure in {arm}: {reason}")]
    HandlerFailure { arm: String, reason: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // Persistence errors
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool failure in {tool}: {reason}")]
    ToolFailure { tool: String, reason: String },

    #[error("Tool {tool} timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    // Protocol errors
    #[error("Protocol invariant violated: {0}")]
    ProtocolInvariantViolation(String),

    #[error("Invalid gate {gate}: valid gates are 1..={max}")]
    InvalidGate { gate: u32, max: u32 },

    // Control flow
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl EngineError {
    /// Shorthand for a handler failure raised by the named arm
    pub fn handler(arm: impl Into<String>, reason: impl ToString) -> Self {
        Self::HandlerFailure {
            arm: arm.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a tool failure
    pub fn tool(tool: impl Into<String>, reason: impl ToString) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl QuartetErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Routing errors
            Self::UnknownMessageType(_) => "Message type is not recognised by the conductor",

            // Handler errors
            Self::HandlerFailure { .. } => "The handling arm failed. Check engine logs",
            Self::InvalidPayload(_) => "Message payload does not match the expected shape",

            // Persistence errors
            Self::PersistenceFailure(_) => "Memory could not be saved. Check the data directory",
            Self::Database(_) => "Database operation failed. Try again",

            // Tool errors
            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::ToolFailure { .. } => "Tool operation failed",
            Self::ToolTimeout { .. } => "Tool took too long to respond. Try again",

            // Protocol errors
            Self::ProtocolInvariantViolation(_) => "Protocol cannot advance from its current state",
            Self::InvalidGate { .. } => "Gate number is outside the protocol range",

            // Control flow
            Self::Cancelled => "Request was cancelled",
            Self::DeadlineExceeded => "Request ran past its deadline. Try again",

            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::ProtocolInvariantViolation(_) | Self::Config(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
