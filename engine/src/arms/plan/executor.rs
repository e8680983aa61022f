//! Plan execution
//!
//! Orders tasks by dependency, "executes" each one (simulated latency through
//! the injected clock), tags it with the arm that would own it, and reflects
//! at the plan's progress checkpoints.

use super::types::{Adjustment, Checkpoint, ExecutionReport, Plan, Task, TaskResult, TaskStatus};
use crate::clock::Clock;
use crate::config::PlanConfig;
use crate::message_bus::{Event, MessageBus};
use sdk::context::CallContext;
use sdk::errors::EngineError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Topological order of `tasks`
///
/// A task is ready once every dependency is already ordered. Dependencies
/// naming unknown tasks are ignored. When nothing is ready the remaining
/// tasks form a cycle, and the first of them is forced so the walk always
/// terminates.
pub fn get_execution_order(tasks: &[Task]) -> Vec<String> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut ordered: HashSet<&str> = HashSet::with_capacity(tasks.len());
    let mut order = Vec::with_capacity(tasks.len());
    let mut remaining: Vec<&Task> = tasks.iter().collect();

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|task| {
            task.dependencies
                .iter()
                .filter(|d| known.contains(d.as_str()))
                .all(|d| ordered.contains(d.as_str()))
        });

        let index = match ready {
            Some(i) => i,
            None => {
                debug!(
                    "Dependency cycle among {} tasks, forcing {}",
                    remaining.len(),
                    remaining[0].id
                );
                0
            }
        };

        let task = remaining.remove(index);
        ordered.insert(task.id.as_str());
        order.push(task.id.clone());
    }

    order
}

/// Arm that would own a task, by keyword
pub fn route_task(description: &str) -> &'static str {
    let lower = description.to_lowercase();
    if lower.contains("research") || lower.contains("analyze") {
        "reason_arm"
    } else if lower.contains("remember") || lower.contains("store") {
        "memory_arm"
    } else if lower.contains("execute") || lower.contains("control") {
        "environment_arm"
    } else {
        "plan_arm"
    }
}

pub struct PlanExecutor {
    clock: Arc<dyn Clock>,
    config: PlanConfig,
    bus: MessageBus,
}

impl PlanExecutor {
    pub fn new(clock: Arc<dyn Clock>, config: PlanConfig, bus: MessageBus) -> Self {
        Self { clock, config, bus }
    }

    /// Run every task of `plan` in dependency order
    ///
    /// Task statuses are updated in place. Cancellation or deadline expiry
    /// stops the walk before the next task.
    pub async fn execute_plan_workflow(
        &self,
        plan: &mut Plan,
        ctx: &CallContext,
    ) -> Result<ExecutionReport, EngineError> {
        let order = get_execution_order(&plan.tasks);
        let total = plan.tasks.len();
        let mut task_results = Vec::with_capacity(total);
        let mut checkpoints: Vec<Checkpoint> = Vec::new();
        let mut adjustments = Vec::new();
        let mut successful = 0usize;

        info!("Executing plan {} ({} tasks)", plan.id, total);

        for (done, task_id) in order.iter().enumerate() {
            ctx.check()?;

            let Some(task) = plan.tasks.iter_mut().find(|t| &t.id == task_id) else {
                continue;
            };

            let arm = route_task(&task.goal);
            task.assigned_arm = Some(arm.to_string());
            task.status = TaskStatus::Running;
            debug!("Task {} -> {}", task.id, arm);

            ctx.run(self.clock.sleep(self.config.task_latency()))
                .await?;

            task.status = TaskStatus::Completed;
            successful += 1;
            task_results.push(TaskResult {
                task_id: task.id.clone(),
                assigned_arm: arm.to_string(),
                success: true,
                output: format!("{} handled by {}", task.goal, arm),
            });

            let completed = done + 1;
            let progress = completed as f64 / total as f64;

            for point in plan.reflection_points.iter().copied() {
                let already = checkpoints.iter().any(|c| c.progress == point);
                if already || progress + f64::EPSILON < point {
                    continue;
                }

                let checkpoint = self.reflect(point, completed, successful);
                if checkpoint.needs_adjustment {
                    adjustments.push(Adjustment {
                        progress: point,
                        note: format!(
                            "At {:.0}%: quality {:.2}, timeline adherence {:.2}; review remaining tasks",
                            point * 100.0,
                            checkpoint.quality_score,
                            checkpoint.timeline_adherence
                        ),
                    });
                }

                self.bus
                    .publish(Event::PlanCheckpoint {
                        plan_id: plan.id.clone(),
                        progress: point,
                        needs_adjustment: checkpoint.needs_adjustment,
                    })
                    .await;
                checkpoints.push(checkpoint);
            }
        }

        Ok(ExecutionReport {
            order,
            task_results,
            checkpoints,
            adjustments,
            completed_tasks: successful,
            total_tasks: total,
        })
    }

    fn reflect(&self, progress: f64, completed: usize, successful: usize) -> Checkpoint {
        let quality_score = if completed == 0 {
            1.0
        } else {
            successful as f64 / completed as f64
        };
        let timeline_adherence = self.config.timeline_adherence;

        Checkpoint {
            progress,
            completed_tasks: completed,
            quality_score,
            timeline_adherence,
            needs_adjustment: quality_score < self.config.quality_threshold
                || timeline_adherence < self.config.timeline_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arms::plan::planner::decompose_goal;
    use crate::clock::InstantClock;
    use serde_json::json;
    use std::time::Duration;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            goal: id.to_string(),
            priority: 5,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            estimated_duration: 10,
            assigned_arm: None,
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn test_order_respects_dependencies() {
        let tasks = vec![task("c", &["b"]), task("b", &["a"]), task("a", &[])];
        assert_eq!(get_execution_order(&tasks), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_forces_progress() {
        let tasks = vec![task("x", &["y"]), task("y", &["x"]), task("z", &[])];
        let order = get_execution_order(&tasks);

        assert_eq!(order.len(), 3);
        assert_eq!(order[0], "z");
        assert_eq!(order[1], "x");
    }

    #[test]
    fn test_route_task_keywords() {
        assert_eq!(route_task("Research the market"), "reason_arm");
        assert_eq!(route_task("Analyze logs"), "reason_arm");
        assert_eq!(route_task("Remember this"), "memory_arm");
        assert_eq!(route_task("Store results"), "memory_arm");
        assert_eq!(route_task("Execute the deploy"), "environment_arm");
        assert_eq!(route_task("Control the lights"), "environment_arm");
        assert_eq!(route_task("Draw conclusions"), "plan_arm");
    }

    #[tokio::test]
    async fn test_workflow_records_all_checkpoints() {
        let clock = Arc::new(InstantClock::new());
        let executor = PlanExecutor::new(clock.clone(), PlanConfig::default(), MessageBus::new());
        let mut plan = decompose_goal("create a website", 5, &json!({}), clock.now());

        let report = executor
            .execute_plan_workflow(&mut plan, &CallContext::new())
            .await
            .unwrap();

        assert_eq!(report.completed_tasks, 5);
        let points: Vec<f64> = report.checkpoints.iter().map(|c| c.progress).collect();
        assert_eq!(points, vec![0.25, 0.5, 0.75, 1.0]);
        assert!(report.adjustments.is_empty());
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50); 5]);
    }

    #[tokio::test]
    async fn test_low_adherence_produces_adjustments() {
        let config = PlanConfig {
            timeline_adherence: 0.5,
            ..PlanConfig::default()
        };
        let executor = PlanExecutor::new(Arc::new(InstantClock::new()), config, MessageBus::new());
        let mut plan = decompose_goal("analyze data", 5, &json!({}), chrono::Utc::now());

        let report = executor
            .execute_plan_workflow(&mut plan, &CallContext::new())
            .await
            .unwrap();

        assert!(report.checkpoints.iter().all(|c| c.needs_adjustment));
        assert_eq!(report.adjustments.len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_execution() {
        let executor = PlanExecutor::new(
            Arc::new(InstantClock::new()),
            PlanConfig::default(),
            MessageBus::new(),
        );
        let mut plan = decompose_goal("anything", 5, &json!({}), chrono::Utc::now());
        let ctx = CallContext::new();
        ctx.cancel();

        let result = executor.execute_plan_workflow(&mut plan, &ctx).await;
        assert_eq!(result, Err(EngineError::Cancelled));
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }
}
