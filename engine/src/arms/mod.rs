//! The four arms dispatched by the conductor

pub mod environment;
pub mod memory;
pub mod plan;
pub mod reason;

pub use environment::{DryRunBackend, EnvironmentArm, EnvironmentBackend, ENVIRONMENT_ARM};
pub use memory::{MemoryArm, MEMORY_ARM};
pub use plan::{PlanArm, PLAN_ARM};
pub use reason::{OfflineInvoker, ReasonArm, ToolInvoker, REASON_ARM};
