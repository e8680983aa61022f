//! Plan arm
//!
//! Handles `goal` messages: decompose the goal into a plan, execute it, and
//! return both the plan and the execution report.

pub mod executor;
pub mod planner;
pub mod types;

pub use executor::{get_execution_order, route_task, PlanExecutor};
pub use planner::{calculate_dependencies, create_timeline, decompose_goal};
pub use types::{
    Adjustment, Checkpoint, ExecutionReport, GoalRequest, Plan, Task, TaskResult, TaskStatus,
    TimeSlot,
};

use crate::clock::Clock;
use crate::config::PlanConfig;
use crate::message_bus::MessageBus;
use async_trait::async_trait;
use sdk::{Arm, CallContext, EngineError, Message};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const PLAN_ARM: &str = "plan_arm";

pub struct PlanArm {
    clock: Arc<dyn Clock>,
    executor: PlanExecutor,
}

impl PlanArm {
    pub fn new(clock: Arc<dyn Clock>, config: PlanConfig, bus: MessageBus) -> Self {
        Self {
            executor: PlanExecutor::new(clock.clone(), config, bus),
            clock,
        }
    }

    /// Decompose and execute one goal
    pub async fn handle_goal(
        &self,
        request: GoalRequest,
        ctx: &CallContext,
    ) -> Result<(Plan, ExecutionReport), EngineError> {
        if request.goal.trim().is_empty() {
            return Err(EngineError::InvalidPayload("goal text is empty".to_string()));
        }

        let mut plan = decompose_goal(
            &request.goal,
            request.priority,
            &request.context,
            self.clock.now(),
        );
        info!("Decomposed goal into plan {} with {} tasks", plan.id, plan.tasks.len());

        let report = self.executor.execute_plan_workflow(&mut plan, ctx).await?;
        Ok((plan, report))
    }
}

#[async_trait]
impl Arm for PlanArm {
    fn name(&self) -> &str {
        PLAN_ARM
    }

    async fn handle(&self, msg: Message, ctx: &CallContext) -> Result<Message, EngineError> {
        let request: GoalRequest = serde_json::from_value(msg.payload.clone())?;
        let (plan, report) = self.handle_goal(request, ctx).await?;

        Ok(Message::respond(
            &msg,
            json!({
                "success": true,
                "plan": plan,
                "execution": report,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::InstantClock;

    fn arm() -> PlanArm {
        PlanArm::new(
            Arc::new(InstantClock::new()),
            PlanConfig::default(),
            MessageBus::new(),
        )
    }

    #[tokio::test]
    async fn test_goal_message_round_trip() {
        let msg = Message::new("goal", json!({"text": "Create a song", "priority": 8}));
        let response = arm().handle(msg.clone(), &CallContext::new()).await.unwrap();

        assert!(response.success());
        assert_eq!(response.kind.as_str(), "goal_response");
        assert_eq!(response.payload["request_id"], json!(msg.id));
        assert_eq!(response.payload["plan"]["priority"], json!(8));
        assert_eq!(response.payload["execution"]["total_tasks"], json!(5));
    }

    #[tokio::test]
    async fn test_missing_goal_is_invalid_payload() {
        let msg = Message::new("goal", json!({"priority": 1}));
        let err = arm().handle(msg, &CallContext::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }
}
