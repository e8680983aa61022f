//! Quartet Engine Library
//!
//! Message orchestration core: a conductor routing typed messages to the
//! plan, reason, memory and environment arms, plus the spiral protocol state
//! machine. Used by both the `quartet` binary and the integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Message bus for inter-component communication
pub mod message_bus;

/// Injectable time source
pub mod clock;

/// Plan, reason, memory and environment arms
pub mod arms;

/// Spiral protocol state machine
pub mod spiral;

/// Message routing and quarantine
pub mod conductor;

/// Wiring of conductor, arms and collaborators
pub mod orchestrator;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
