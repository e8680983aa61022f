//! Goal decomposition
//!
//! Turns a goal into a [`Plan`] by matching it against three fixed task
//! templates, then derives the dependency map and a sequential timeline.

use super::types::{Plan, Task, TaskStatus, TimeSlot};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Progress fractions at which execution reflects
pub const REFLECTION_POINTS: [f64; 4] = [0.25, 0.5, 0.75, 1.0];

/// (description, depends on template indices, estimated minutes)
type Template = &'static [(&'static str, &'static [usize], u32)];

const CREATE_TEMPLATE: Template = &[
    ("Research requirements and prior art", &[], 30),
    ("Design the structure of the solution", &[0], 45),
    ("Execute the build of core components", &[1], 90),
    ("Analyze the result against requirements", &[2], 30),
    ("Store the outcome and lessons learned", &[3], 15),
];

const ANALYZE_TEMPLATE: Template = &[
    ("Research and collect relevant data", &[], 30),
    ("Analyze patterns in the collected data", &[0], 60),
    ("Draw conclusions from the findings", &[1], 30),
    ("Remember key insights for later", &[2], 15),
];

const GENERIC_TEMPLATE: Template = &[
    ("Clarify the objective and constraints", &[], 20),
    ("Research available approaches", &[0], 30),
    ("Execute the chosen approach", &[1], 60),
    ("Review results and store a summary", &[2], 20),
];

/// Pick the task template for `goal` by keyword
fn template_for(goal: &str) -> (&'static str, Template) {
    let lower = goal.to_lowercase();
    if lower.contains("create") {
        ("create", CREATE_TEMPLATE)
    } else if lower.contains("analyze") {
        ("analyze", ANALYZE_TEMPLATE)
    } else {
        ("generic", GENERIC_TEMPLATE)
    }
}

/// Build a plan for `goal` starting at `now`
pub fn decompose_goal(goal: &str, priority: i64, context: &Value, now: DateTime<Utc>) -> Plan {
    let (kind, template) = template_for(goal);
    let plan_id = format!("plan_{}", uuid::Uuid::new_v4().simple());

    let tasks: Vec<Task> = template
        .iter()
        .enumerate()
        .map(|(i, (description, deps, minutes))| Task {
            id: format!("{}_task_{}", plan_id, i + 1),
            goal: (*description).to_string(),
            priority,
            dependencies: deps
                .iter()
                .map(|d| format!("{}_task_{}", plan_id, d + 1))
                .collect(),
            estimated_duration: *minutes,
            assigned_arm: None,
            status: TaskStatus::Pending,
        })
        .collect();

    let mut success_metrics = vec![
        format!("All {} tasks completed", tasks.len()),
        "Quality score at or above threshold at every checkpoint".to_string(),
    ];
    if kind != "generic" {
        success_metrics.push(format!("{} goal satisfied: {}", kind, goal));
    }
    if let Some(deadline) = context.get("deadline").and_then(Value::as_str) {
        success_metrics.push(format!("Finished before {}", deadline));
    }

    let dependencies = calculate_dependencies(&tasks);
    let timeline = create_timeline(&tasks, now);

    Plan {
        id: plan_id,
        goal: goal.to_string(),
        priority,
        tasks,
        dependencies,
        timeline,
        success_metrics,
        reflection_points: REFLECTION_POINTS.to_vec(),
        created_at: now,
    }
}

/// Dependency map straight from each task's declared dependencies
pub fn calculate_dependencies(tasks: &[Task]) -> BTreeMap<String, Vec<String>> {
    tasks
        .iter()
        .map(|t| (t.id.clone(), t.dependencies.clone()))
        .collect()
}

/// Lay tasks end to end in declaration order
pub fn create_timeline(tasks: &[Task], start: DateTime<Utc>) -> BTreeMap<String, TimeSlot> {
    let mut cursor = start;
    let mut timeline = BTreeMap::new();

    for task in tasks {
        let end = cursor + Duration::minutes(i64::from(task.estimated_duration));
        timeline.insert(task.id.clone(), TimeSlot { start: cursor, end });
        cursor = end;
    }

    timeline
}
