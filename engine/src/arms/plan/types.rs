//! Plan arm types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload of a `goal` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRequest {
    #[serde(alias = "text")]
    pub goal: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub context: Value,
}

fn default_priority() -> i64 {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub priority: i64,
    pub dependencies: Vec<String>,
    /// Minutes
    pub estimated_duration: u32,
    pub assigned_arm: Option<String>,
    pub status: TaskStatus,
}

/// Scheduled window for one task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub goal: String,
    pub priority: i64,
    pub tasks: Vec<Task>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub timeline: BTreeMap<String, TimeSlot>,
    pub success_metrics: Vec<String>,
    /// Progress fractions at which the executor reflects
    pub reflection_points: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of executing one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub assigned_arm: String,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub progress: f64,
    pub completed_tasks: usize,
    pub quality_score: f64,
    pub timeline_adherence: f64,
    pub needs_adjustment: bool,
}

/// Non-binding note produced when a checkpoint falls below threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub progress: f64,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub order: Vec<String>,
    pub task_results: Vec<TaskResult>,
    pub checkpoints: Vec<Checkpoint>,
    pub adjustments: Vec<Adjustment>,
    pub completed_tasks: usize,
    pub total_tasks: usize,
}
